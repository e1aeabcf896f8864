use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Segment, SizeOf};
use crate::error::DataError;

/// The cached domain payload. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "shipReference")]
    pub reference: String,
    #[serde(rename = "shipToken")]
    pub token: String,
    #[serde(rename = "canIssueTicketChecking", default)]
    pub can_issue_ticket: bool,
    #[serde(rename = "expiryTime", with = "unix_seconds")]
    pub expiry_time: DateTime<Utc>,
    /// Trip duration in minutes.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Booking {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time <= now
    }

    /// Negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expiry_time - now
    }

    /// "40h 30m"
    pub fn duration_display(&self) -> String {
        let hours = self.duration / 60;
        let minutes = self.duration % 60;
        if hours == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }

    pub fn validate(&self, rules: &ValidationRules) -> Result<(), DataError> {
        if rules.require_reference && self.reference.trim().is_empty() {
            return Err(DataError::Validation("booking reference is empty".to_string()));
        }
        if rules.require_token && self.token.trim().is_empty() {
            return Err(DataError::Validation(format!(
                "booking {} has an empty token",
                self.reference
            )));
        }
        if self.segments.len() < rules.min_segments {
            return Err(DataError::Validation(format!(
                "booking {} has {} segments, at least {} required",
                self.reference,
                self.segments.len(),
                rules.min_segments
            )));
        }
        if rules.unique_segment_ids {
            let mut seen = HashSet::new();
            if let Some(dup) = self.segments.iter().find(|s| !seen.insert(s.id)) {
                return Err(DataError::Validation(format!(
                    "booking {} has duplicate segment id {}",
                    self.reference, dup.id
                )));
            }
        }
        if rules.require_location_codes {
            let missing = self.segments.iter().find(|s| {
                s.pair.origin.code.trim().is_empty() || s.pair.destination.code.trim().is_empty()
            });
            if let Some(segment) = missing {
                return Err(DataError::Validation(format!(
                    "segment {} of booking {} is missing a location code",
                    segment.id, self.reference
                )));
            }
        }
        Ok(())
    }
}

impl SizeOf for Booking {
    fn size_of(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.reference.len()
            + self.token.len()
            + self.segments.size_of()
            - std::mem::size_of::<Vec<Segment>>()
    }
}

/// Which semantic checks a freshly fetched booking must pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub require_reference: bool,
    pub require_token: bool,
    pub min_segments: usize,
    pub unique_segment_ids: bool,
    pub require_location_codes: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            require_reference: true,
            require_token: true,
            min_segments: 1,
            unique_segment_ids: true,
            require_location_codes: true,
        }
    }
}

impl ValidationRules {
    /// Accept anything that decoded.
    pub fn permissive() -> Self {
        Self {
            require_reference: false,
            require_token: false,
            min_segments: 0,
            unique_segment_ids: false,
            require_location_codes: false,
        }
    }
}

/// `expiryTime` arrives as Unix seconds, sometimes quoted.
mod unix_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.timestamp().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let secs = match Raw::deserialize(deserializer)? {
            Raw::Int(secs) => secs,
            Raw::Float(secs) => secs as i64,
            Raw::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| de::Error::custom(format!("invalid expiryTime {:?}", text)))?,
        };
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| de::Error::custom(format!("expiryTime {} out of range", secs)))
    }
}
