//! Event file naming convention.
//!
//! Event writers smuggle the creating host and creation time into the file
//! name as dot-separated fields:
//!
//! ```text
//! events.out.tfevents.1700000000.node07.cluster.local.4242.0
//! \_________________/ \________/ \__________________/ \____/
//!       prefix         timestamp         host         trailing
//! ```
//!
//! Hostnames may themselves contain dots, so the host is whatever remains once
//! the fixed leading and trailing fields are stripped. All parsing goes through
//! [`EventFileLayout::parse`].

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;

use crate::error::FileNameError;

/// Where the timestamp field sits relative to the host fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPosition {
    /// `<prefix>.<timestamp>.<host>.<trailing>` (TensorBoard writers).
    #[default]
    AfterPrefix,
    /// `<prefix>.<host>.<timestamp>.<trailing>`.
    BeforeTrailing,
}

/// Field layout of event file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFileLayout {
    /// Fixed leading fields, dot-joined.
    pub prefix: String,
    /// Number of fields after the host/timestamp block (process id, sequence, ...).
    pub trailing_fields: usize,
    pub timestamp_position: TimestampPosition,
}

impl Default for EventFileLayout {
    fn default() -> Self {
        Self {
            prefix: "events.out.tfevents".to_string(),
            trailing_fields: 2,
            timestamp_position: TimestampPosition::AfterPrefix,
        }
    }
}

/// Metadata recovered from an event file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogFileName {
    pub host: String,
    pub timestamp: i64,
    pub trailing: Vec<String>,
}

impl EventFileLayout {
    fn prefix_fields(&self) -> Vec<&str> {
        if self.prefix.is_empty() {
            Vec::new()
        } else {
            self.prefix.split('.').collect()
        }
    }

    /// Minimum number of fields a conforming name has: prefix, timestamp,
    /// at least one host field, trailing.
    pub fn min_fields(&self) -> usize {
        self.prefix_fields().len() + 2 + self.trailing_fields
    }

    /// Whether a file name carries the expected prefix fields.
    pub fn matches(&self, name: &str) -> bool {
        let prefix = self.prefix_fields();
        let fields: Vec<&str> = name.split('.').collect();
        fields.len() >= prefix.len() && fields[..prefix.len()] == prefix[..]
    }

    /// Parse a file name into host, timestamp and trailing fields.
    pub fn parse(&self, name: &str) -> Result<ParsedLogFileName, FileNameError> {
        let prefix = self.prefix_fields();
        let fields: Vec<&str> = name.split('.').collect();
        if !self.matches(name) {
            return Err(FileNameError::PrefixMismatch);
        }
        let required = self.min_fields();
        if fields.len() < required {
            return Err(FileNameError::TooFewFields {
                found: fields.len(),
                required,
            });
        }

        let middle_end = fields.len() - self.trailing_fields;
        let middle = &fields[prefix.len()..middle_end];
        let (timestamp_field, host_fields) = match self.timestamp_position {
            TimestampPosition::AfterPrefix => (middle[0], &middle[1..]),
            TimestampPosition::BeforeTrailing => {
                (middle[middle.len() - 1], &middle[..middle.len() - 1])
            }
        };

        let timestamp = timestamp_field
            .parse::<i64>()
            .map_err(|_| FileNameError::InvalidTimestamp {
                field: timestamp_field.to_string(),
            })?;
        let host = host_fields.join(".");
        if host.is_empty() {
            return Err(FileNameError::EmptyHost);
        }

        Ok(ParsedLogFileName {
            host,
            timestamp,
            trailing: fields[middle_end..].iter().map(|f| f.to_string()).collect(),
        })
    }

    /// Parse a raw OS file name.
    pub fn parse_os(&self, name: &OsStr) -> Result<ParsedLogFileName, FileNameError> {
        let name = name.to_str().ok_or(FileNameError::NonUtf8)?;
        self.parse(name)
    }

    /// Build a file name. Missing trailing fields are filled with `0`, extra
    /// ones are ignored, so the result always parses back under this layout.
    pub fn format(&self, host: &str, timestamp: i64, trailing: &[&str]) -> String {
        let mut fields: Vec<String> = self
            .prefix_fields()
            .iter()
            .map(|f| f.to_string())
            .collect();
        match self.timestamp_position {
            TimestampPosition::AfterPrefix => {
                fields.push(timestamp.to_string());
                fields.push(host.to_string());
            }
            TimestampPosition::BeforeTrailing => {
                fields.push(host.to_string());
                fields.push(timestamp.to_string());
            }
        }
        for i in 0..self.trailing_fields {
            fields.push(trailing.get(i).copied().unwrap_or("0").to_string());
        }
        fields.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_tensorboard_name() {
        let layout = EventFileLayout::default();
        let parsed = layout
            .parse("events.out.tfevents.1700000000.node07.4242.0")
            .unwrap();
        assert_eq!(
            parsed,
            ParsedLogFileName {
                host: "node07".into(),
                timestamp: 1_700_000_000,
                trailing: vec!["4242".into(), "0".into()],
            }
        );
    }

    #[test]
    fn test_parse_dotted_host() {
        let layout = EventFileLayout::default();
        let parsed = layout
            .parse("events.out.tfevents.1699999990.node07.cluster.example.org.77.3")
            .unwrap();
        assert_eq!(parsed.host, "node07.cluster.example.org");
        assert_eq!(parsed.timestamp, 1_699_999_990);
    }

    #[test]
    fn test_parse_timestamp_before_trailing() {
        let layout = EventFileLayout {
            timestamp_position: TimestampPosition::BeforeTrailing,
            ..Default::default()
        };
        let parsed = layout
            .parse("events.out.tfevents.gpu.lab.1700000123.9.v2")
            .unwrap();
        assert_eq!(parsed.host, "gpu.lab");
        assert_eq!(parsed.timestamp, 1_700_000_123);
    }

    #[test]
    fn test_parse_rejects_foreign_prefix() {
        let layout = EventFileLayout::default();
        assert_eq!(
            layout.parse("checkpoint.1700000000.node07.1.0"),
            Err(FileNameError::PrefixMismatch)
        );
        assert!(!layout.matches("runlog.json"));
    }

    #[test]
    fn test_parse_too_few_fields() {
        let layout = EventFileLayout::default();
        assert_eq!(
            layout.parse("events.out.tfevents.1700000000.4242.0"),
            Err(FileNameError::TooFewFields {
                found: 6,
                required: 7
            })
        );
    }

    #[test]
    fn test_parse_bad_timestamp() {
        let layout = EventFileLayout::default();
        assert!(matches!(
            layout.parse("events.out.tfevents.node07.cluster.1.0"),
            Err(FileNameError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_format_fills_trailing_fields() {
        let layout = EventFileLayout::default();
        assert_eq!(
            layout.format("node07", 1_700_000_000, &["99"]),
            "events.out.tfevents.1700000000.node07.99.0"
        );
    }

    #[test]
    fn test_custom_prefix_and_trailing() {
        let layout = EventFileLayout {
            prefix: "metrics".into(),
            trailing_fields: 1,
            timestamp_position: TimestampPosition::AfterPrefix,
        };
        let name = layout.format("a.b", 42, &["log"]);
        assert_eq!(name, "metrics.42.a.b.log");
        assert_eq!(layout.parse(&name).unwrap().host, "a.b");
    }
}
