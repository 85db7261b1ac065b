use std::fmt::Display;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Label name holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

const SEP: u8 = b'\xff';

/// Label is a key/value pair of strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new<S: Into<String>>(name: S, value: S) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A set of labels identifying a series, ordered by label name.
///
/// Ordering between sets compares label by label, so a set that is a prefix of
/// another sorts first.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Returns a sorted label set. Name uniqueness is the caller's responsibility.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Labels(labels)
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let labels = pairs
            .iter()
            .map(|(name, value)| Label::new(*name, *value))
            .collect();
        Self::new(labels)
    }

    pub fn from_metric_name(name: &str) -> Self {
        Labels(vec![Label::new(METRIC_NAME_LABEL, name)])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Returns the value for the label with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        if name.is_empty() {
            return None;
        }
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Returns a copy of the set without the named label.
    pub fn without(&self, name: &str) -> Labels {
        Labels(self.0.iter().filter(|l| l.name != name).cloned().collect())
    }

    /// A stable hash of the set, used to group result series.
    pub fn signature(&self) -> u64 {
        let mut buf: Vec<u8> = Vec::with_capacity(64);
        for label in self.0.iter() {
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(SEP);
            buf.extend_from_slice(label.value.as_bytes());
            buf.push(SEP);
        }
        xxh3_64(&buf)
    }
}

impl From<Vec<Label>> for Labels {
    fn from(value: Vec<Label>) -> Self {
        Labels::new(value)
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}
