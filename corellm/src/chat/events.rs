//! Typesafe events for the chat module.

use serde::{Deserialize, Serialize};

use crate::models::events::ModelLoadingStateChanged;

/// Generation state change event - single event stream for all generation transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum GenerationStateChanged {
    /// A message was accepted and the placeholder reply appended
    #[serde(rename = "started")]
    Started { prompt: String },
    /// Cumulative partial output
    #[serde(rename = "partial")]
    Partial {
        #[serde(rename = "tokenCount")]
        token_count: usize,
        text: String,
    },
    /// Generation finished successfully
    #[serde(rename = "complete")]
    Complete {
        text: String,
        #[serde(rename = "tokenCount")]
        token_count: usize,
        #[serde(rename = "tokensPerSecond")]
        tokens_per_second: f64,
    },
    /// Generation was abandoned because the model was switched
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Loading or generating failed
    #[serde(rename = "error")]
    Error {
        /// Technical error message for debugging
        #[serde(rename = "errorMessage")]
        error_message: String,
        /// User-friendly error message
        #[serde(rename = "userMessage")]
        user_message: String,
    },
}

/// Everything the controller broadcasts, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "camelCase")]
pub enum ChatEvent {
    Loading(ModelLoadingStateChanged),
    Generation(GenerationStateChanged),
}

impl From<ModelLoadingStateChanged> for ChatEvent {
    fn from(event: ModelLoadingStateChanged) -> Self {
        ChatEvent::Loading(event)
    }
}

impl From<GenerationStateChanged> for ChatEvent {
    fn from(event: GenerationStateChanged) -> Self {
        ChatEvent::Generation(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_are_tagged() {
        let partial = ChatEvent::from(GenerationStateChanged::Partial {
            token_count: 8,
            text: "Hello".into(),
        });
        assert_eq!(
            serde_json::to_value(&partial).unwrap(),
            json!({
                "kind": "generation",
                "event": { "state": "partial", "tokenCount": 8, "text": "Hello" }
            })
        );

        let started = ChatEvent::from(ModelLoadingStateChanged::Started {
            model_name: "smollm-135m-4bit".into(),
        });
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({
                "kind": "loading",
                "event": { "state": "started", "modelName": "smollm-135m-4bit" }
            })
        );
    }
}
