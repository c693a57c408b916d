use std::fmt;

use serde::{Deserialize, Serialize};

/// A named channel a connection can subscribe to.
///
/// Only topics present in the configured [`TopicCatalog`] are ever accepted
/// from clients or ingestion; constructing one directly skips that check.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("topic set is empty")]
    Empty,
    #[error("invalid topic name: {0:?}")]
    InvalidName(String),
    #[error("duplicate topic: {0}")]
    Duplicate(String),
    #[error("unknown topic: {0}")]
    Unknown(String),
}

/// The closed set of subscribable topics, fixed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicCatalog {
    topics: Vec<Topic>,
}

impl TopicCatalog {
    /// Build a catalog, rejecting empty sets, duplicates and names outside
    /// `[a-z0-9_.-]`.
    pub fn new<I, S>(names: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut topics: Vec<Topic> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !is_valid_name(name) {
                return Err(TopicError::InvalidName(name.to_string()));
            }
            if topics.iter().any(|t| t.as_str() == name) {
                return Err(TopicError::Duplicate(name.to_string()));
            }
            topics.push(Topic::new(name));
        }
        if topics.is_empty() {
            return Err(TopicError::Empty);
        }
        Ok(Self { topics })
    }

    /// Look up a client-supplied topic name. Matching is exact.
    pub fn resolve(&self, name: &str) -> Result<Topic, TopicError> {
        self.topics
            .iter()
            .find(|t| t.as_str() == name)
            .cloned()
            .ok_or_else(|| TopicError::Unknown(name.to_string()))
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for TopicCatalog {
    fn default() -> Self {
        Self {
            topics: vec![Topic::new("time"), Topic::new("location")],
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}
