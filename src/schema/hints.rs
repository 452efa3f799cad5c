use crate::error::SchemaError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Column hint categories understood by destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    PrimaryKey,
    NotNull,
    Unique,
    ForeignKey,
    Partition,
    Cluster,
    Sort,
}

impl Hint {
    pub fn as_str(self) -> &'static str {
        match self {
            Hint::PrimaryKey => "primary_key",
            Hint::NotNull => "not_null",
            Hint::Unique => "unique",
            Hint::ForeignKey => "foreign_key",
            Hint::Partition => "partition",
            Hint::Cluster => "cluster",
            Hint::Sort => "sort",
        }
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column-name regex, kept together with its source text.
///
/// Equality and serialization use the source text only.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(source: impl Into<String>) -> Result<Self, SchemaError> {
        let source = source.into();
        let regex = Regex::new(&source).map_err(|e| SchemaError::InvalidPattern {
            pattern: source.clone(),
            source: e,
        })?;
        Ok(NamePattern { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for NamePattern {}

impl Serialize for NamePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for NamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        NamePattern::new(source).map_err(serde::de::Error::custom)
    }
}
