//! Transcript payload delivered with a `done` signal.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single timed word inside an utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// A diarized span of speech attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    #[serde(default)]
    pub speaker: u32,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// Result body of a completed vendor job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub utterances: Vec<Utterance>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl Transcript {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            utterances: Vec::new(),
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Utterances with non-blank text, trimmed. Text, JSON and counts all
    /// derive from this list.
    pub fn spoken(&self) -> Vec<Utterance> {
        self.utterances
            .iter()
            .filter_map(|u| {
                let text = u.text.trim();
                (!text.is_empty()).then(|| Utterance {
                    text: text.to_string(),
                    ..u.clone()
                })
            })
            .collect()
    }

    /// Plain text stored on the recording.
    ///
    /// Falls back to one `Speaker N: text` line per spoken utterance when
    /// the vendor sent utterances without a flattened transcript.
    pub fn text(&self) -> String {
        let flat = self.transcript.trim();
        if !flat.is_empty() {
            return flat.to_string();
        }

        self.spoken()
            .iter()
            .map(|u| format!("Speaker {}: {}", u.speaker, u.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Structured form stored alongside the text: `{"utterances": [...]}`.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({ "utterances": self.spoken() })
    }

    pub fn word_count(&self) -> u32 {
        self.text().split_whitespace().count() as u32
    }

    pub fn speaker_count(&self) -> u32 {
        self.spoken()
            .iter()
            .map(|u| u.speaker)
            .collect::<BTreeSet<_>>()
            .len() as u32
    }
}

/// Seconds rounded to whole minutes, as carried by the meeting projection.
pub fn duration_minutes(seconds: f64) -> i32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds / 60.0).round() as i32
}
