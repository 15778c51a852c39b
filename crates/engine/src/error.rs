use thiserror::Error;

/// Errors raised while resolving, fetching or loading a model.
///
/// `Clone` because a single in-flight load is shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("no model selected")]
    NoModelSelected,

    #[error("model not found in catalog: {0}")]
    UnknownModel(String),

    #[error("failed to fetch model weights: {0}")]
    FetchFailed(String),

    #[error("not enough memory to load model: {0}")]
    ResourceExhausted(String),

    #[error("model load failed: {0}")]
    Engine(String),
}

impl LoadError {
    /// Returns a user-friendly error message suitable for display in the transcript
    pub fn user_message(&self) -> String {
        match self {
            LoadError::NoModelSelected => "No model selected. Pick a model first.".to_string(),
            LoadError::UnknownModel(id) => {
                format!("Model '{}' not found. Please select a valid model.", id)
            }
            LoadError::FetchFailed(msg) => {
                format!("Could not download the model: {}", msg)
            }
            LoadError::ResourceExhausted(_) => {
                "Not enough memory for this model. Try a smaller one.".to_string()
            }
            LoadError::Engine(msg) => format!("Failed to load model: {}", msg),
        }
    }
}

/// Errors raised by a session while generating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Engine(String),

    #[error("failed to encode prompt: {0}")]
    Encoding(String),

    #[error("generation worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}

impl GenerationError {
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Engine(msg) => format!("Generation failed: {}", msg),
            GenerationError::Encoding(_) => {
                "The message could not be prepared for the model.".to_string()
            }
            GenerationError::WorkerPanicked(_) => {
                "Generation stopped unexpectedly. Please try again.".to_string()
            }
        }
    }
}
