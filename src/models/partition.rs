//! Partition assignment models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where a newly opened partition reader starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetPolicy {
    /// Earliest retained record
    Oldest,
    /// Only records produced after the reader is opened
    Newest,
}

impl OffsetPolicy {
    /// librdkafka `auto.offset.reset` value for this policy
    pub fn auto_offset_reset(&self) -> &'static str {
        match self {
            OffsetPolicy::Oldest => "earliest",
            OffsetPolicy::Newest => "latest",
        }
    }
}

impl FromStr for OffsetPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "oldest" | "earliest" | "-2" => Ok(OffsetPolicy::Oldest),
            "newest" | "latest" | "-1" => Ok(OffsetPolicy::Newest),
            other => Err(Error::config(format!(
                "Unknown offset type '{}' (expected oldest/-2 or newest/-1)",
                other
            ))),
        }
    }
}

impl fmt::Display for OffsetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetPolicy::Oldest => write!(f, "oldest"),
            OffsetPolicy::Newest => write!(f, "newest"),
        }
    }
}

/// A partition bound to the worker that consumes it
///
/// Built once by the supervisor during startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub offset_policy: OffsetPolicy,
}

impl PartitionAssignment {
    pub fn new(topic: impl Into<String>, partition: i32, offset_policy: OffsetPolicy) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset_policy,
        }
    }
}

impl fmt::Display for PartitionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_policy_from_str() {
        assert_eq!("oldest".parse::<OffsetPolicy>().unwrap(), OffsetPolicy::Oldest);
        assert_eq!("-2".parse::<OffsetPolicy>().unwrap(), OffsetPolicy::Oldest);
        assert_eq!("Earliest".parse::<OffsetPolicy>().unwrap(), OffsetPolicy::Oldest);
        assert_eq!("newest".parse::<OffsetPolicy>().unwrap(), OffsetPolicy::Newest);
        assert_eq!("-1".parse::<OffsetPolicy>().unwrap(), OffsetPolicy::Newest);
        assert!("0".parse::<OffsetPolicy>().is_err());
    }

    #[test]
    fn test_offset_policy_auto_offset_reset() {
        assert_eq!(OffsetPolicy::Oldest.auto_offset_reset(), "earliest");
        assert_eq!(OffsetPolicy::Newest.auto_offset_reset(), "latest");
    }

    #[test]
    fn test_assignment_display() {
        let assignment = PartitionAssignment::new("database", 3, OffsetPolicy::Oldest);
        assert_eq!(assignment.to_string(), "database[3]@oldest");
    }
}
