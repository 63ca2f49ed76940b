//! Grouping key for buffered records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Time bucket in seconds since Unix epoch
pub type Timekey = i64;

/// Grouping key for records: time bucket, routing tag and custom variables.
///
/// Metadata is compared, hashed and ordered structurally. The derived
/// ordering (timekey, then tag, then variables, `None` first) is also the
/// order in which a write locks chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Metadata {
    /// Time bucket the records belong to
    pub timekey: Option<Timekey>,
    /// Routing tag
    pub tag: Option<String>,
    /// Custom placeholder variables
    pub variables: Option<BTreeMap<String, String>>,
}

impl Metadata {
    /// Create metadata from its parts, as given
    pub fn new(
        timekey: Option<Timekey>,
        tag: Option<String>,
        variables: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            timekey,
            tag,
            variables,
        }
    }

    /// Create canonical metadata: an empty tag or an empty variable map is
    /// the same key as no tag or no variables.
    pub fn canonical(
        timekey: Option<Timekey>,
        tag: Option<String>,
        variables: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            timekey,
            tag: tag.filter(|t| !t.is_empty()),
            variables: variables.filter(|v| !v.is_empty()),
        }
    }

    /// Set the time bucket
    pub fn with_timekey(mut self, timekey: Timekey) -> Self {
        self.timekey = Some(timekey);
        self
    }

    /// Set the routing tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Add a custom variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Check if no field is set
    pub fn is_empty(&self) -> bool {
        self.timekey.is_none() && self.tag.is_none() && self.variables.is_none()
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(t) = self.timekey {
            parts.push(format!("timekey={}", t));
        }
        if let Some(tag) = &self.tag {
            parts.push(format!("tag={}", tag));
        }
        if let Some(vars) = &self.variables {
            for (k, v) in vars {
                parts.push(format!("{}={}", k, v));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}
