//! Completion signals and their validation at the ingress boundary.
//!
//! Both the push callback and the poll response share one wire shape
//! (`VendorPayload`). It is converted into a [`Signal`] exactly once; the raw
//! status string never travels further than this module.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::id::VendorJobId;
use crate::transcript::Transcript;

/// Fallback message when the vendor reports `error` without a reason.
pub const UNKNOWN_VENDOR_ERROR: &str = "transcription failed without a reason from the vendor";

/// Closed set of statuses the vendor may report.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl VendorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl FromStr for VendorStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(PipelineError::malformed(format!("unknown status `{other}`"))),
        }
    }
}

/// Wire body of a webhook delivery and of a vendor status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPayload {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<Transcript>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a signal says about its job.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Queued,
    Processing,
    Done(Transcript),
    Error(String),
}

impl SignalKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    pub fn status(&self) -> VendorStatus {
        match self {
            Self::Queued => VendorStatus::Queued,
            Self::Processing => VendorStatus::Processing,
            Self::Done(_) => VendorStatus::Done,
            Self::Error(_) => VendorStatus::Error,
        }
    }
}

/// A validated completion signal for one vendor job.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub job_id: VendorJobId,
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(job_id: VendorJobId, kind: SignalKind) -> Self {
        Self { job_id, kind }
    }

    pub fn done(job_id: VendorJobId, transcript: Transcript) -> Self {
        Self::new(job_id, SignalKind::Done(transcript))
    }

    pub fn error(job_id: VendorJobId, message: impl Into<String>) -> Self {
        Self::new(job_id, SignalKind::Error(message.into()))
    }

    pub fn processing(job_id: VendorJobId) -> Self {
        Self::new(job_id, SignalKind::Processing)
    }
}

/// Where a signal came from. Only used for logging; both sources are applied
/// identically.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalSource {
    Webhook,
    Poll,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Poll => "poll",
        }
    }
}

impl core::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<VendorPayload> for Signal {
    type Error = PipelineError;

    fn try_from(payload: VendorPayload) -> Result<Self, Self::Error> {
        let job_id = VendorJobId::parse(payload.id)?;
        let status: VendorStatus = payload.status.parse()?;

        let kind = match status {
            VendorStatus::Queued => SignalKind::Queued,
            VendorStatus::Processing => SignalKind::Processing,
            VendorStatus::Done => {
                let result = payload.result.ok_or_else(|| {
                    PipelineError::malformed(format!("job {job_id} reported done without a result"))
                })?;
                SignalKind::Done(result)
            }
            VendorStatus::Error => {
                let message = payload
                    .error
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| UNKNOWN_VENDOR_ERROR.to_string());
                SignalKind::Error(message)
            }
        };

        Ok(Signal { job_id, kind })
    }
}

/// Parse a raw JSON body into a validated signal.
pub fn parse_signal(body: &[u8]) -> Result<Signal, PipelineError> {
    let payload: VendorPayload = serde_json::from_slice(body)
        .map_err(|e| PipelineError::malformed(format!("invalid payload: {e}")))?;
    Signal::try_from(payload)
}
