use std::fmt::Display;
use regex::{Error as RegexError, Regex};
use crate::common::labels::Labels;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexEqual,
    RegexNotEqual,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::RegexEqual => "=~",
            MatchOp::RegexNotEqual => "!~",
        }
    }
}

impl Display for MatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate over a single label of a series.
///
/// Regex matchers are anchored at both ends, so `foo.*` does not match `xfoo`.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub op: MatchOp,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(op: MatchOp, name: &str, value: &str) -> Result<Self, RegexError> {
        let re = match op {
            MatchOp::RegexEqual | MatchOp::RegexNotEqual => {
                Some(Regex::new(&format!("^(?:{value})$"))?)
            }
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            op,
            name: name.to_string(),
            value: value.to_string(),
            re,
        })
    }

    pub fn equal(name: &str, value: &str) -> Self {
        Self {
            op: MatchOp::Equal,
            name: name.to_string(),
            value: value.to_string(),
            re: None,
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        match (self.op, &self.re) {
            (MatchOp::Equal, _) => s == self.value,
            (MatchOp::NotEqual, _) => s != self.value,
            (MatchOp::RegexEqual, Some(re)) => re.is_match(s),
            (MatchOp::RegexNotEqual, Some(re)) => !re.is_match(s),
            // regex ops are always constructed with a compiled regex
            (MatchOp::RegexEqual, None) => false,
            (MatchOp::RegexNotEqual, None) => true,
        }
    }

    /// Reports whether the matcher accepts the empty string, i.e. whether it
    /// would also select series lacking the label entirely.
    pub fn matches_empty(&self) -> bool {
        self.matches("")
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.name == other.name && self.value == other.value
    }
}

impl Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Returns true if every matcher accepts the label set. A missing label is
/// treated as having the empty value.
pub fn matches_labels(labels: &Labels, matchers: &[Matcher]) -> bool {
    matchers
        .iter()
        .all(|m| m.matches(labels.get(&m.name).unwrap_or("")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(MatchOp::Equal, "bar", "bar", true ; "equal")]
    #[test_case(MatchOp::Equal, "bar", "baz", false ; "equal mismatch")]
    #[test_case(MatchOp::NotEqual, "bar", "baz", true ; "not equal")]
    #[test_case(MatchOp::RegexEqual, "ba.", "bar", true ; "regex")]
    #[test_case(MatchOp::RegexEqual, "ba", "bar", false ; "regex is anchored")]
    #[test_case(MatchOp::RegexNotEqual, "foo|bar", "bar", false ; "negated regex")]
    #[test_case(MatchOp::RegexNotEqual, "foo", "bar", true ; "negated regex mismatch")]
    fn matcher_ops(op: MatchOp, pattern: &str, input: &str, expected: bool) {
        let m = Matcher::new(op, "job", pattern).unwrap();
        assert_eq!(m.matches(input), expected);
    }

    #[test]
    fn missing_label_is_treated_as_empty() {
        let labels = Labels::from_metric_name("bar");
        let absent = Matcher::new(MatchOp::Equal, "job", "").unwrap();
        let present = Matcher::new(MatchOp::NotEqual, "job", "").unwrap();
        assert!(matches_labels(&labels, &[absent.clone()]));
        assert!(!matches_labels(&labels, &[present]));
        assert!(absent.matches_empty());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(Matcher::new(MatchOp::RegexEqual, "job", "(").is_err());
    }

    #[test]
    fn display() {
        let m = Matcher::new(MatchOp::RegexEqual, "job", "api.*").unwrap();
        assert_eq!(m.to_string(), r#"job=~"api.*""#);
    }
}
