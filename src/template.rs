//! Logic-less prompt templates.
//!
//! A restricted Mustache dialect: variables (`{{name}}`, `{{a.b}}`, `{{.}}`,
//! `{{{name}}}`, `{{&name}}`), sections (`{{#name}}…{{/name}}`), inverted
//! sections (`{{^name}}…{{/name}}`) and comments (`{{! … }}`). Nothing in a
//! template can evaluate an expression. Values are substituted verbatim: Slack
//! text already arrives entity-encoded, so no HTML escaping is applied.
//! `{{name}}`, `{{{name}}}` and `{{&name}}` therefore render identically.
//!
//! Section, inverted, closing and comment tags that stand alone on a line
//! remove that whole line from the output.

use crate::error::{Error, Result};

use serde::Serialize;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Variable(String),
    SectionOpen { name: String, inverted: bool },
    SectionClose(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Variable(String),
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

/// A parsed template, reusable across contexts.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let nodes = build_tree(tokens)?;
        Ok(Self { nodes })
    }

    /// Render against any serialisable context.
    pub fn render<C: Serialize>(&self, context: &C) -> Result<String> {
        let root = serde_json::to_value(context)
            .map_err(|error| Error::Template(format!("context is not serialisable: {error}")))?;
        Ok(self.render_value(&root))
    }

    pub fn render_value(&self, root: &Value) -> String {
        let mut output = String::new();
        let mut stack = vec![root];
        render_nodes(&self.nodes, &mut stack, &mut output);
        output
    }
}

/// Parse and render in one step.
pub fn render<C: Serialize>(source: &str, context: &C) -> Result<String> {
    Template::parse(source)?.render(context)
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut cursor = 0;

    while let Some(offset) = source[cursor..].find(OPEN) {
        let tag_start = cursor + offset;
        text.push_str(&source[cursor..tag_start]);

        let after_open = tag_start + OPEN.len();
        let (raw, tag_end) = if source[after_open..].starts_with('{') {
            let close = source[after_open + 1..]
                .find("}}}")
                .ok_or_else(|| unterminated(source, tag_start))?;
            let inner = &source[after_open + 1..after_open + 1 + close];
            (format!("&{inner}"), after_open + 1 + close + 3)
        } else {
            let close = source[after_open..]
                .find(CLOSE)
                .ok_or_else(|| unterminated(source, tag_start))?;
            let inner = &source[after_open..after_open + close];
            (inner.to_string(), after_open + close + CLOSE.len())
        };

        let raw = raw.trim();
        let (sigil, name) = match raw.chars().next() {
            Some(c @ ('#' | '^' | '/' | '!' | '&' | '=' | '>')) => (Some(c), raw[1..].trim()),
            _ => (None, raw),
        };

        let token = match sigil {
            Some('#') => Some(Token::SectionOpen {
                name: checked_name(name)?,
                inverted: false,
            }),
            Some('^') => Some(Token::SectionOpen {
                name: checked_name(name)?,
                inverted: true,
            }),
            Some('/') => Some(Token::SectionClose(checked_name(name)?)),
            Some('!') => None,
            Some('&') | None => Some(Token::Variable(checked_name(name)?)),
            Some(other) => {
                return Err(Error::Template(format!(
                    "unsupported tag `{{{{{other}…}}}}` at byte {tag_start}"
                )));
            }
        };

        let standalone_capable = !matches!(token, Some(Token::Variable(_)));
        let mut next = tag_end;
        if standalone_capable && let Some(line_end) = standalone_line_end(source, tag_start, tag_end)
        {
            let indent = text.len() - text.trim_end_matches([' ', '\t']).len();
            text.truncate(text.len() - indent);
            next = line_end;
        }

        if let Some(token) = token {
            if !text.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut text)));
            }
            tokens.push(token);
        }
        cursor = next;
    }

    text.push_str(&source[cursor..]);
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

/// If the tag spanning `start..end` is the only non-blank content of its line,
/// return the offset just past that line's terminator.
fn standalone_line_end(source: &str, start: usize, end: usize) -> Option<usize> {
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    if !source[line_start..start].chars().all(|c| c == ' ' || c == '\t') {
        return None;
    }
    let rest = &source[end..];
    let line_len = rest.find('\n').map_or(rest.len(), |i| i + 1);
    let line = &rest[..line_len];
    if line.trim_end_matches(['\n', '\r']).chars().all(|c| c == ' ' || c == '\t') {
        Some(end + line_len)
    } else {
        None
    }
}

fn checked_name(name: &str) -> Result<String> {
    let valid = name == "."
        || (!name.is_empty()
            && name.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            }));
    if valid {
        Ok(name.to_string())
    } else {
        Err(Error::Template(format!("invalid tag name `{name}`")))
    }
}

fn unterminated(source: &str, at: usize) -> Error {
    let preview: String = source[at..].chars().take(20).collect();
    Error::Template(format!("unterminated tag at byte {at}: `{preview}`"))
}

fn build_tree(tokens: Vec<Token>) -> Result<Vec<Node>> {
    // Each frame holds the nodes collected so far and the section that owns them.
    let mut frames: Vec<(Option<(String, bool)>, Vec<Node>)> = vec![(None, Vec::new())];

    for token in tokens {
        match token {
            Token::Text(text) => current(&mut frames).push(Node::Text(text)),
            Token::Variable(name) => current(&mut frames).push(Node::Variable(name)),
            Token::SectionOpen { name, inverted } => {
                frames.push((Some((name, inverted)), Vec::new()));
            }
            Token::SectionClose(name) => {
                let (owner, children) = frames
                    .pop()
                    .ok_or_else(|| Error::Template("unbalanced sections".into()))?;
                match owner {
                    Some((open, inverted)) if open == name => {
                        current(&mut frames).push(Node::Section {
                            name,
                            inverted,
                            children,
                        });
                    }
                    Some((open, _)) => {
                        return Err(Error::Template(format!(
                            "section `{open}` closed by `{name}`"
                        )));
                    }
                    None => {
                        return Err(Error::Template(format!(
                            "closing tag `{name}` without matching section"
                        )));
                    }
                }
            }
        }
    }

    if frames.len() > 1 {
        let open = frames
            .last()
            .and_then(|(owner, _)| owner.as_ref())
            .map(|(name, _)| name.clone())
            .unwrap_or_default();
        return Err(Error::Template(format!("section `{open}` is never closed")));
    }

    Ok(frames.pop().map(|(_, nodes)| nodes).unwrap_or_default())
}

fn current(frames: &mut [(Option<(String, bool)>, Vec<Node>)]) -> &mut Vec<Node> {
    // `frames` always holds the root frame.
    &mut frames[frames.len() - 1].1
}

fn render_nodes<'v>(nodes: &[Node], stack: &mut Vec<&'v Value>, output: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Variable(name) => {
                if let Some(value) = lookup(stack, name) {
                    push_scalar(value, output);
                }
            }
            Node::Section {
                name,
                inverted,
                children,
            } => {
                let value = lookup(stack, name);
                let truthy = value.is_some_and(is_truthy);
                if *inverted {
                    if !truthy {
                        render_nodes(children, stack, output);
                    }
                    continue;
                }
                let Some(value) = value.filter(|v| is_truthy(v)) else {
                    continue;
                };
                match value {
                    Value::Array(items) => {
                        for item in items {
                            stack.push(item);
                            render_nodes(children, stack, output);
                            stack.pop();
                        }
                    }
                    other => {
                        stack.push(other);
                        render_nodes(children, stack, output);
                        stack.pop();
                    }
                }
            }
        }
    }
}

/// Resolve a (possibly dotted) name against the context stack, innermost
/// frame first.
fn lookup<'v>(stack: &[&'v Value], name: &str) -> Option<&'v Value> {
    if name == "." {
        return stack.last().copied();
    }
    let mut parts = name.split('.');
    let head = parts.next()?;
    let mut value = stack
        .iter()
        .rev()
        .find_map(|frame| frame.as_object().and_then(|object| object.get(head)))?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Number(_) | Value::Object(_) => true,
    }
}

fn push_scalar(value: &Value, output: &mut String) {
    match value {
        Value::String(text) => output.push_str(text),
        Value::Number(number) => output.push_str(&number.to_string()),
        Value::Bool(flag) => output.push_str(if *flag { "true" } else { "false" }),
        Value::Null | Value::Array(_) | Value::Object(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_a_single_field() {
        assert_eq!(render("{{message}}", &json!({"message": "X"})).unwrap(), "X");
    }

    #[test]
    fn iterates_thread_entries() {
        let context = json!({
            "thread": [{"text": "a"}, {"text": "b"}, {"text": "c"}]
        });
        assert_eq!(
            render("{{#thread}}{{text}} {{/thread}}", &context).unwrap(),
            "a b c "
        );
    }

    #[test]
    fn iteration_falls_back_to_outer_fields() {
        let context = json!({
            "url": "https://x/archives/C1/p1",
            "thread": [{"user": "Alice", "text": "hi"}, {"text": "yo"}]
        });
        let rendered = render(
            "{{#thread}}{{user}}|{{text}}|{{url}}\n{{/thread}}",
            &context,
        )
        .unwrap();
        assert_eq!(
            rendered,
            "Alice|hi|https://x/archives/C1/p1\n|yo|https://x/archives/C1/p1\n"
        );
    }

    #[test]
    fn missing_fields_render_empty() {
        let context = json!({"message": "m"});
        assert_eq!(render("[{{nope}}][{{a.b.c}}]", &context).unwrap(), "[][]");
        assert_eq!(render("{{#nope}}x{{/nope}}", &context).unwrap(), "");
    }

    #[test]
    fn does_not_escape_values() {
        let context = json!({"message": "<@U1> & co", "quote": "\"a\" 'b' &amp;"});
        assert_eq!(render("{{message}}", &context).unwrap(), "<@U1> & co");
        assert_eq!(render("{{{message}}}", &context).unwrap(), "<@U1> & co");
        assert_eq!(render("{{& message }}", &context).unwrap(), "<@U1> & co");

        let plain = render("{{quote}}", &context).unwrap();
        assert_eq!(plain, "\"a\" 'b' &amp;");
        assert_eq!(render("{{{quote}}}", &context).unwrap(), plain);
        assert_eq!(render("{{&quote}}", &context).unwrap(), plain);
    }

    #[test]
    fn inverted_sections_render_when_falsy() {
        let template = "{{#thread}}has{{/thread}}{{^thread}}empty{{/thread}}";
        assert_eq!(render(template, &json!({"thread": []})).unwrap(), "empty");
        assert_eq!(render(template, &json!({"thread": [1]})).unwrap(), "has");
    }

    #[test]
    fn dotted_names_and_implicit_iterator() {
        let context = json!({"a": {"b": "deep"}, "list": ["x", "y"]});
        assert_eq!(render("{{a.b}}", &context).unwrap(), "deep");
        assert_eq!(render("{{#list}}<{{.}}>{{/list}}", &context).unwrap(), "<x><y>");
    }

    #[test]
    fn standalone_tags_drop_their_line() {
        let template = "<thread>\n{{#thread}}\n{{user}}: {{text}}\n{{/thread}}\n</thread>\n{{! note }}\nend";
        let context = json!({"thread": [{"user": "A", "text": "1"}, {"user": "B", "text": "2"}]});
        assert_eq!(
            render(template, &context).unwrap(),
            "<thread>\nA: 1\nB: 2\n</thread>\nend"
        );
    }

    #[test]
    fn comments_are_dropped_inline() {
        assert_eq!(render("a{{! hidden }}b", &json!({})).unwrap(), "ab");
    }

    #[test]
    fn rejects_malformed_templates() {
        for template in [
            "{{#thread}}never closed",
            "{{/thread}}",
            "{{#a}}{{/b}}",
            "{{message",
            "{{{message}}",
            "{{=<% %>=}}",
            "{{> partial}}",
            "{{message | upper}}",
        ] {
            let error = render(template, &json!({})).unwrap_err();
            assert!(matches!(error, Error::Template(_)), "{template}");
        }
    }

    #[test]
    fn renders_numbers_and_booleans() {
        let context = json!({"n": 42, "flag": true});
        assert_eq!(render("{{n}} {{flag}}", &context).unwrap(), "42 true");
    }
}
