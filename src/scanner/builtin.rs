//! Scanners that run in-process.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::scanner::registry::parse_options;
use crate::scanner::{ScanOutcome, Scanner, ScannerError};

const REDACTED: &str = "[REDACTED]";

/// Rough token estimate used when no tokenizer is available.
const BYTES_PER_TOKEN_ESTIMATE: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BanSubstringsOptions {
    substrings: Vec<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    redact: bool,
}

/// Fails (or redacts) when any listed substring occurs.
pub struct BanSubstrings {
    patterns: Vec<String>,
    matcher: AhoCorasick,
    redact: bool,
}

impl BanSubstrings {
    pub fn new(substrings: Vec<String>, case_sensitive: bool, redact: bool) -> Result<Self, String> {
        if substrings.is_empty() {
            return Err("substrings must not be empty".to_string());
        }
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(!case_sensitive)
            .build(&substrings)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            patterns: substrings,
            matcher,
            redact,
        })
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let o: BanSubstringsOptions = parse_options(options)?;
        Self::new(o.substrings, o.case_sensitive, o.redact)
    }
}

#[async_trait]
impl Scanner for BanSubstrings {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError> {
        let Some(first) = self.matcher.find(text) else {
            return Ok(ScanOutcome::pass());
        };
        let found = &self.patterns[first.pattern().as_usize()];

        if self.redact {
            let replacements = vec![REDACTED; self.patterns.len()];
            let redacted = self.matcher.replace_all(text, &replacements);
            return Ok(ScanOutcome::sanitized(redacted, "banned substring redacted"));
        }
        Ok(ScanOutcome::fail(format!("contains banned substring {:?}", found)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegexOptions {
    patterns: Vec<String>,
    #[serde(default)]
    redact: bool,
}

/// Fails (or redacts) when any pattern matches.
pub struct RegexScanner {
    patterns: Vec<Regex>,
    redact: bool,
}

impl RegexScanner {
    pub fn new(patterns: &[String], redact: bool) -> Result<Self, String> {
        if patterns.is_empty() {
            return Err("patterns must not be empty".to_string());
        }
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| format!("pattern {:?}: {}", p, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, redact })
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let o: RegexOptions = parse_options(options)?;
        Self::new(&o.patterns, o.redact)
    }
}

#[async_trait]
impl Scanner for RegexScanner {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError> {
        let Some(hit) = self.patterns.iter().find(|re| re.is_match(text)) else {
            return Ok(ScanOutcome::pass());
        };

        if self.redact {
            let mut redacted = text.to_string();
            for re in &self.patterns {
                redacted = re.replace_all(&redacted, REDACTED).into_owned();
            }
            return Ok(ScanOutcome::sanitized(redacted, "pattern match redacted"));
        }
        Ok(ScanOutcome::fail(format!("matches pattern {:?}", hit.as_str())))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenLimitOptions {
    limit: usize,
}

/// Fails when the estimated token count exceeds the limit.
pub struct TokenLimit {
    limit: usize,
}

impl TokenLimit {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let o: TokenLimitOptions = parse_options(options)?;
        if o.limit == 0 {
            return Err("limit must be > 0".to_string());
        }
        Ok(Self::new(o.limit))
    }

    pub fn estimate(text: &str) -> usize {
        text.len().div_ceil(BYTES_PER_TOKEN_ESTIMATE)
    }
}

#[async_trait]
impl Scanner for TokenLimit {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError> {
        let tokens = Self::estimate(text);
        if tokens > self.limit {
            return Ok(ScanOutcome::fail(format!(
                "estimated {} tokens exceeds limit of {}",
                tokens, self.limit
            )));
        }
        Ok(ScanOutcome::pass())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InvisibleTextOptions {
    #[serde(default)]
    fail_on_detect: bool,
}

/// Removes zero-width, bidi control, tag and private-use characters.
pub struct InvisibleText {
    fail_on_detect: bool,
}

impl InvisibleText {
    pub fn new(fail_on_detect: bool) -> Self {
        Self { fail_on_detect }
    }

    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let o: InvisibleTextOptions = parse_options(options)?;
        Ok(Self::new(o.fail_on_detect))
    }
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
            | '\u{E000}'..='\u{F8FF}'
            | '\u{E0000}'..='\u{E007F}'
    )
}

#[async_trait]
impl Scanner for InvisibleText {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError> {
        let found = text.chars().filter(|c| is_invisible(*c)).count();
        if found == 0 {
            return Ok(ScanOutcome::pass());
        }
        if self.fail_on_detect {
            return Ok(ScanOutcome::fail(format!("{} invisible characters", found)));
        }
        let cleaned: String = text.chars().filter(|c| !is_invisible(*c)).collect();
        Ok(ScanOutcome::sanitized(
            cleaned,
            format!("removed {} invisible characters", found),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ban_substrings() {
        let scanner = BanSubstrings::from_options(&json!({ "substrings": ["forbidden"] })).unwrap();
        let outcome = scanner.check("this is FORBIDDEN content").await.unwrap();
        assert!(!outcome.passed);
        assert!(outcome.reason.unwrap().contains("forbidden"));

        assert!(scanner.check("this is fine").await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_ban_substrings_case_sensitive_and_redact() {
        let strict =
            BanSubstrings::from_options(&json!({ "substrings": ["Secret"], "case_sensitive": true }))
                .unwrap();
        assert!(strict.check("a secret").await.unwrap().passed);
        assert!(!strict.check("a Secret").await.unwrap().passed);

        let redact =
            BanSubstrings::from_options(&json!({ "substrings": ["secret"], "redact": true })).unwrap();
        let outcome = redact.check("my secret and SECRET").await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.sanitized.as_deref(), Some("my [REDACTED] and [REDACTED]"));
    }

    #[test]
    fn test_option_errors() {
        assert!(BanSubstrings::from_options(&serde_json::Value::Null).is_err());
        assert!(BanSubstrings::from_options(&json!({ "substrings": [] })).is_err());
        assert!(BanSubstrings::from_options(&json!({ "substrings": ["a"], "bogus": 1 })).is_err());
        assert!(RegexScanner::from_options(&json!({ "patterns": ["("] })).is_err());
        assert!(TokenLimit::from_options(&json!({ "limit": 0 })).is_err());
    }

    #[tokio::test]
    async fn test_regex_scanner() {
        let scanner = RegexScanner::from_options(&json!({ "patterns": [r"\b\d{3}-\d{2}-\d{4}\b"] }))
            .unwrap();
        assert!(!scanner.check("ssn 123-45-6789").await.unwrap().passed);
        assert!(scanner.check("no numbers").await.unwrap().passed);

        let redact = RegexScanner::from_options(
            &json!({ "patterns": [r"[a-z]+@example\.com"], "redact": true }),
        )
        .unwrap();
        let outcome = redact.check("mail bob@example.com now").await.unwrap();
        assert_eq!(outcome.sanitized.as_deref(), Some("mail [REDACTED] now"));
    }

    #[tokio::test]
    async fn test_token_limit() {
        let scanner = TokenLimit::new(2);
        assert!(scanner.check("12345678").await.unwrap().passed);
        assert!(!scanner.check("123456789").await.unwrap().passed);
        assert_eq!(TokenLimit::estimate(""), 0);
    }

    #[tokio::test]
    async fn test_invisible_text() {
        let scanner = InvisibleText::new(false);
        let outcome = scanner.check("he\u{200B}llo\u{FEFF}").await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.sanitized.as_deref(), Some("hello"));
        assert!(scanner.check("hello").await.unwrap().sanitized.is_none());

        let strict = InvisibleText::new(true);
        assert!(!strict.check("a\u{202E}b").await.unwrap().passed);
    }
}
