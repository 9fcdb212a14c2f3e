use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use zova_turn::{Message, Vote};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplayError {
    #[snafu(display("failed to read transcript at {path:?} on `{stage}`: {source}"))]
    ReadTranscript {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse transcript at {path:?} on `{stage}`: {source}"))]
    ParseTranscript {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to load settings on `{stage}`: {source}"))]
    LoadSettings {
        stage: &'static str,
        source: zova_turn::SettingsError,
    },
    #[snafu(display("usage: zova-replay <transcript.json> [settings.json]"))]
    Usage { stage: &'static str },
}

pub type ReplayResult<T> = Result<T, ReplayError>;

/// Scripted life of one message slot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Makes every feedback write fail, to exercise the retry path.
    #[serde(default)]
    pub fail_feedback: bool,
    #[serde(default)]
    pub index: usize,
    pub message: Message,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Idle time after the last step, so timers can fire.
    #[serde(default)]
    pub tail_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub after_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    Append { text: String },
    Replace { text: String },
    Finish,
    Vote { vote: Vote },
    Detail {
        #[serde(default)]
        reasons: BTreeSet<String>,
        #[serde(default)]
        text: String,
    },
    Cancel,
    Reset,
}

impl Transcript {
    pub fn load(path: &Path) -> ReplayResult<Self> {
        let raw = std::fs::read_to_string(path).context(ReadTranscriptSnafu {
            stage: "read-transcript",
            path: path.to_path_buf(),
        })?;
        serde_json::from_str(&raw).context(ParseTranscriptSnafu {
            stage: "parse-transcript",
            path: path.to_path_buf(),
        })
    }
}

fn default_base_url() -> String {
    "file:///tmp/zova-attachments".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scripted_steps() {
        let raw = r#"{
            "message": {"id": "m-1", "createdDate": "17", "role": "assistant"},
            "loading": true,
            "steps": [
                {"afterMs": 20, "action": "append", "text": "Hel"},
                {"action": "finish"},
                {"action": "vote", "vote": "bad"},
                {"afterMs": 100, "action": "detail", "reasons": ["harmful"], "text": "no"}
            ],
            "tailMs": 3500
        }"#;

        let transcript: Transcript = serde_json::from_str(raw).expect("transcript parses");
        assert_eq!(transcript.steps.len(), 4);
        assert_eq!(transcript.steps[0].after_ms, 20);
        assert!(matches!(transcript.steps[1].action, Action::Finish));
        assert!(matches!(
            transcript.steps[2].action,
            Action::Vote { vote: Vote::Bad }
        ));
        assert!(matches!(
            &transcript.steps[3].action,
            Action::Detail { reasons, .. } if reasons.contains("harmful")
        ));
        assert_eq!(transcript.tail_ms, 3_500);
    }
}
