mod commands;
mod controller;
pub mod events;
mod handle;
mod seed;
mod state_manager;
mod transcript;

pub use commands::ChatCommand;
pub use controller::{
    Controller, ControllerSettings, RunFailure, CANCELLED_MESSAGE, DEFAULT_CACHE_LIMIT_BYTES,
    DEFAULT_SYSTEM_PROMPT, EMPTY_PARTIAL_PLACEHOLDER, THINKING_PLACEHOLDER,
};
pub use events::{ChatEvent, GenerationStateChanged};
pub use handle::{ChatHandle, HandleError};
pub use seed::SeedSource;
pub use state_manager::{
    ChatStateMachine, LoadEvent, LoadState, RunRejection, TransitionRejection, TransitionResult,
};
pub use transcript::{Role, Transcript, TranscriptEntry};

use serde::{Deserialize, Serialize};

/// Everything the presentation layer renders, pushed after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub status_label: String,
    pub transcript: Vec<TranscriptEntry>,
    pub running: bool,
    pub load_state: LoadState,
    /// Latest generated text, or the failure description
    pub output: String,
    /// Throughput of the last successful generation
    pub stat: String,
    pub selected_model: Option<String>,
}

impl ChatSnapshot {
    pub fn initial() -> Self {
        Self {
            status_label: "No model loaded".to_string(),
            transcript: Vec::new(),
            running: false,
            load_state: LoadState::Idle,
            output: String::new(),
            stat: String::new(),
            selected_model: None,
        }
    }

    pub fn last_entry(&self) -> Option<&TranscriptEntry> {
        self.transcript.last()
    }
}
