//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Primary key of a canonical recording.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(Uuid);

impl RecordingId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for RecordingId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for RecordingId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s.trim())
            .map_err(|e| PipelineError::malformed(format!("recording_id: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Opaque identifiers minted by systems outside this pipeline.
macro_rules! impl_external_id {
    ($t:ident, $name:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            /// Wrap an externally assigned identifier. Blank values are rejected.
            pub fn parse(value: impl Into<String>) -> Result<Self, PipelineError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(PipelineError::malformed(concat!($name, " must not be empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_external_id!(VendorJobId, "job id");
impl_external_id!(ExternalBotId, "bot id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_id_parses_uuid() {
        let id = RecordingId::new();
        let parsed: RecordingId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn recording_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<RecordingId>().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSignal(_)));
    }

    #[test]
    fn external_ids_trim_and_reject_blank() {
        assert_eq!(VendorJobId::parse("  job-1 ").unwrap().as_str(), "job-1");
        assert!(ExternalBotId::parse("   ").is_err());
    }
}
