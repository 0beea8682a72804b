//! Slack permalink parsing.
//!
//! A permalink looks like
//! `https://team.slack.com/archives/C0123/p1700000000123456?thread_ts=1699999999.000100`.
//! The `p`-prefixed digit run is the message timestamp with the decimal point
//! removed; the last six digits are the microsecond part.

use crate::error::{Error, Result};

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static ARCHIVES_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/archives/([^/]+)/p(\d+)$").expect("hardcoded regex"));

/// Number of trailing digits that form the fractional part of a Slack `ts`.
const TS_FRACTION_DIGITS: usize = 6;

/// A message located by a permalink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReference {
    pub channel: String,
    /// `seconds.micros`, e.g. `1700000000.123456`.
    pub ts: String,
    /// Root of the thread the message lives in, when the link carries one.
    /// Passed through verbatim.
    pub thread_ts: Option<String>,
}

impl MessageReference {
    /// The timestamp of the thread root this message belongs to.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// Parse a permalink into a [`MessageReference`].
pub fn resolve(permalink: &str) -> Result<MessageReference> {
    let url = url::Url::parse(permalink)
        .map_err(|error| Error::InvalidReference(format!("{permalink}: {error}")))?;

    let captures = ARCHIVES_PATH.captures(url.path()).ok_or_else(|| {
        Error::InvalidReference(format!("{permalink}: path is not /archives/<channel>/p<ts>"))
    })?;

    let channel = captures[1].to_string();
    let digits = &captures[2];
    if digits.len() <= TS_FRACTION_DIGITS {
        return Err(Error::InvalidReference(format!(
            "{permalink}: timestamp `{digits}` is too short"
        )));
    }
    let (seconds, micros) = digits.split_at(digits.len() - TS_FRACTION_DIGITS);
    let ts = format!("{seconds}.{micros}");

    let thread_ts = url
        .query_pairs()
        .find(|(key, _)| key == "thread_ts")
        .map(|(_, value)| value.into_owned());

    Ok(MessageReference {
        channel,
        ts,
        thread_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_top_level_message() {
        let reference = resolve("https://x/archives/C1/p1700000000123456").unwrap();

        assert_eq!(
            reference,
            MessageReference {
                channel: "C1".into(),
                ts: "1700000000.123456".into(),
                thread_ts: None,
            }
        );
        assert_eq!(reference.thread_root(), "1700000000.123456");
    }

    #[test]
    fn carries_thread_ts_through_unparsed() {
        let reference = resolve(
            "https://team.slack.com/archives/C0ABC/p1700000100000200?thread_ts=1700000000.000100&cid=C0ABC",
        )
        .unwrap();

        assert_eq!(reference.channel, "C0ABC");
        assert_eq!(reference.ts, "1700000100.000200");
        assert_eq!(reference.thread_ts.as_deref(), Some("1700000000.000100"));
        assert_eq!(reference.thread_root(), "1700000000.000100");
    }

    #[test]
    fn inserts_point_six_digits_from_the_end() {
        for (digits, expected) in [
            ("1234567", "1.234567"),
            ("0000001000000", "0000001.000000"),
            ("99999999999999999", "99999999999.999999"),
        ] {
            let reference = resolve(&format!("https://x/archives/G9/p{digits}")).unwrap();
            assert_eq!(reference.ts, expected);
            assert_eq!(reference.channel, "G9");
        }
    }

    #[test]
    fn rejects_other_resource_types() {
        for url in [
            "https://x/files/U1/F1/report.pdf",
            "https://x/archives/C1",
            "https://x/archives/C1/p",
            "https://x/archives/C1/p12ab56789012",
            "https://x/archives/C1/p1700000000123456/extra",
            "https://x/team/U123",
            "https://x/archives//p1700000000123456",
            "https://x/archives/C1/p123456",
            "not a url",
        ] {
            let error = resolve(url).unwrap_err();
            assert!(matches!(error, Error::InvalidReference(_)), "{url}");
            assert!(error.is_validation());
        }
    }
}
