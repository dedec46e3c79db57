//! Classify free-text failure messages and HTTP statuses into `ErrorKind`s.
//!
//! Rules are an ordered list of `(pattern, kind)` pairs evaluated top to
//! bottom; the first match wins and anything unmatched is `Unknown`.

use regex::{Regex, RegexBuilder};
use std::sync::{Arc, OnceLock};

use super::policy::ErrorKind;

/// Built-in rules, in evaluation order. Patterns are case-insensitive.
/// Status codes only count at the start of the message or after `HTTP`,
/// `status`, `code` or `error`, so course numbers such as "MATH 401" fall
/// through to the message text.
const DEFAULT_RULES: &[(ErrorKind, &str)] = &[
    (
        ErrorKind::NetworkError,
        r"timed?\s*out|timeout|connection\s+(reset|refused|closed|aborted)|econnreset|econnrefused|etimedout|enotfound|eai_again|socket hang up|network\s+(error|failure|unreachable|is\s+unreachable|down)|\bdns\s+(error|failure|lookup)|网络(错误|异常|故障|连接|不可用)|超时",
    ),
    (
        ErrorKind::AuthenticationError,
        r"unauthori[sz]ed|(^|http|status|code|error)\s*:?\s*40[13]\b|forbidden|not logged in|log\s?in required|please log\s?in|(session|cookie|token)\s+(expired|invalid|missing)|invalid\s+(session|cookie|token|credentials)|authenticat|未登录|请登录|登录失效|认证",
    ),
    (
        ErrorKind::ResourceExhausted,
        r"\bfull\b|capacity|no\s+(seats|vacanc|remaining|places)|seats?\s+(are\s+)?(unavailable|taken)|quota|已满|余量不足|名额不足",
    ),
    (
        ErrorKind::ResourceConflict,
        r"conflict|clash|overlap|already\s+(selected|enrolled|registered)|冲突|重复选课",
    ),
    (
        ErrorKind::SystemError,
        r"(^|http|status|code|error)\s*:?\s*(5\d\d|429)\b|too many requests|internal server error|bad gateway|service unavailable|(system|server)\s+(error|busy)|系统(繁忙|错误|异常)|服务器",
    ),
];

/// One classification rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: ErrorKind,
    pattern: Regex,
}

impl Rule {
    /// Compile a case-insensitive rule.
    pub fn new(kind: ErrorKind, pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { kind, pattern })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Ordered rule table. Deterministic and free of I/O.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(kind, pattern)| {
                Rule::new(*kind, pattern).expect("built-in classification pattern is valid")
            })
            .collect();
        Self { rules }
    }
}

impl Classifier {
    /// Build from explicit rules; order is evaluation order.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Process-wide classifier over the built-in rules, compiled on first use.
    pub fn builtin() -> &'static Classifier {
        builtin_shared()
    }

    /// Handle to the process-wide built-in classifier.
    pub fn shared() -> Arc<Classifier> {
        Arc::clone(builtin_shared())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify a raw failure message (exception text or response body message).
    pub fn classify(&self, message: &str) -> ErrorKind {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(message))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Classify an HTTP status code through the same rule table.
    pub fn classify_status(&self, code: u16) -> ErrorKind {
        self.classify(&format!("HTTP {}", code))
    }
}

fn builtin_shared() -> &'static Arc<Classifier> {
    static BUILTIN: OnceLock<Arc<Classifier>> = OnceLock::new();
    BUILTIN.get_or_init(|| Arc::new(Classifier::default()))
}

/// Classify with the built-in rules.
pub fn classify(message: &str) -> ErrorKind {
    Classifier::builtin().classify(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile() {
        assert_eq!(Classifier::default().rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn network_messages() {
        assert_eq!(classify("request timed out after 10s"), ErrorKind::NetworkError);
        assert_eq!(classify("read ECONNRESET"), ErrorKind::NetworkError);
        assert_eq!(classify("Connection refused (os error 111)"), ErrorKind::NetworkError);
        assert_eq!(classify("socket hang up"), ErrorKind::NetworkError);
    }

    #[test]
    fn authentication_messages() {
        assert_eq!(classify("Unauthorized"), ErrorKind::AuthenticationError);
        assert_eq!(classify("HTTP 401"), ErrorKind::AuthenticationError);
        assert_eq!(classify("status 403 Forbidden"), ErrorKind::AuthenticationError);
        assert_eq!(classify("Session expired, please log in"), ErrorKind::AuthenticationError);
        assert_eq!(classify("cookie invalid"), ErrorKind::AuthenticationError);
        assert_eq!(classify("您尚未登录"), ErrorKind::AuthenticationError);
    }

    #[test]
    fn exhausted_and_conflict_messages() {
        assert_eq!(classify("Section is FULL"), ErrorKind::ResourceExhausted);
        assert_eq!(classify("class already at capacity"), ErrorKind::ResourceExhausted);
        assert_eq!(classify("课程人数已满"), ErrorKind::ResourceExhausted);
        assert_eq!(classify("Schedule conflict with MATH201"), ErrorKind::ResourceConflict);
        assert_eq!(classify("time clash detected"), ErrorKind::ResourceConflict);
        assert_eq!(classify("上课时间冲突"), ErrorKind::ResourceConflict);
    }

    #[test]
    fn system_messages_and_statuses() {
        assert_eq!(classify("500 Internal Server Error"), ErrorKind::SystemError);
        assert_eq!(classify("System busy, try later"), ErrorKind::SystemError);
        let c = Classifier::builtin();
        assert_eq!(c.classify_status(503), ErrorKind::SystemError);
        assert_eq!(c.classify_status(429), ErrorKind::SystemError);
        assert_eq!(c.classify_status(401), ErrorKind::AuthenticationError);
        assert_eq!(c.classify_status(404), ErrorKind::Unknown);
    }

    #[test]
    fn course_numbers_and_titles_do_not_pick_the_kind() {
        assert_eq!(classify("MATH 401 section is full"), ErrorKind::ResourceExhausted);
        assert_eq!(classify("PHYS 403 has no seats left"), ErrorKind::ResourceExhausted);
        assert_eq!(
            classify("Network Security (CS 455) is full"),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(classify("EE 503 clashes with CS 429"), ErrorKind::ResourceConflict);
        assert_eq!(classify("CS 500 Seminar"), ErrorKind::Unknown);
        assert_eq!(classify("status code: 403"), ErrorKind::AuthenticationError);
        assert_eq!(classify("error 401"), ErrorKind::AuthenticationError);
        assert_eq!(classify("503"), ErrorKind::SystemError);
        assert_eq!(classify("network error"), ErrorKind::NetworkError);
        assert_eq!(classify("Network is unreachable"), ErrorKind::NetworkError);
        assert_eq!(classify("网络连接失败"), ErrorKind::NetworkError);
    }

    #[test]
    fn unmatched_is_unknown() {
        assert_eq!(classify(""), ErrorKind::Unknown);
        assert_eq!(classify("something odd happened"), ErrorKind::Unknown);
    }

    #[test]
    fn first_matching_rule_wins() {
        // Matches both the network and the authentication rule.
        assert_eq!(classify("login timeout, 401"), ErrorKind::NetworkError);
        let custom = Classifier::from_rules(vec![
            Rule::new(ErrorKind::ResourceConflict, "clash").unwrap(),
            Rule::new(ErrorKind::ResourceExhausted, "full|clash").unwrap(),
        ]);
        assert_eq!(custom.classify("full and a clash"), ErrorKind::ResourceConflict);
        assert_eq!(custom.classify("just full"), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn deterministic() {
        let c = Classifier::default();
        for msg in ["Section full", "HTTP 502", "nope"] {
            assert_eq!(c.classify(msg), c.classify(msg));
        }
    }
}
