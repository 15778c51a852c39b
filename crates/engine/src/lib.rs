//! Inference engine capability for the CoreLLM chat front-end.
//!
//! This crate defines the seam between the chat session controller and
//! whatever actually runs a quantized model. An [`InferenceEngine`] turns a
//! [`ModelDescriptor`] into a resident [`Session`]; a session turns a list of
//! chat messages into a token stream, reporting the cumulative tokens to a
//! caller-supplied callback that decides whether to keep going.
//!
//! # Example
//!
//! ```no_run
//! use corellm_engine::{
//!     ChatMessage, GenerationParameters, InferenceEngine, ModelDescriptor, ScriptedEngine,
//!     TokenDisposition, TokenId,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ScriptedEngine::echo();
//! let descriptor = ModelDescriptor::new("smollm-135m-4bit", "mlx-community/SmolLM-135M-Instruct-4bit");
//! let session = engine.load(&descriptor, Box::new(|fraction| println!("{fraction:.2}"))).await?;
//!
//! let messages = [ChatMessage::system("You are a helpful assistant."), ChatMessage::user("hi")];
//! let output = session.generate(&messages, &GenerationParameters::default(), 7, &mut |tokens: &[TokenId]| {
//!     if tokens.len() >= 16 {
//!         TokenDisposition::Stop
//!     } else {
//!         TokenDisposition::Continue
//!     }
//! })?;
//! println!("{}", output.text);
//! # Ok(())
//! # }
//! ```

mod error;
mod scripted;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::{GenerationError, LoadError};
pub use scripted::{GenerationGate, LoadGate, Reply, Script, ScriptedEngine};
pub use types::{
    ChatMessage, GenerationOutput, GenerationParameters, MessageRole, ModelDescriptor,
    TokenDisposition, TokenId,
};

/// Receives fractional load progress in `0.0..=1.0`.
///
/// May be invoked from any execution context the engine chooses.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Produces resident sessions from model descriptors.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Bound the engine's reusable scratch memory. Called before every load.
    fn set_cache_limit(&self, bytes: usize);

    /// Release scratch buffers held for reuse (e.g. when the process is backgrounded).
    fn clear_cache(&self);

    /// Fetch and load the model described by `descriptor`.
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: ProgressCallback,
    ) -> Result<Arc<dyn Session>, LoadError>;
}

/// A loaded model, ready to generate.
///
/// `generate` is blocking and CPU bound; callers drive it from a blocking
/// worker thread.
pub trait Session: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    /// Number of weights in the loaded model.
    fn parameter_count(&self) -> u64;

    /// Generate a reply to `messages`.
    ///
    /// `on_tokens` is called after every produced token with the cumulative
    /// token sequence; returning [`TokenDisposition::Stop`] ends generation.
    /// `seed` re-seeds the sampler for this call only.
    fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: &GenerationParameters,
        seed: u64,
        on_tokens: &mut dyn FnMut(&[TokenId]) -> TokenDisposition,
    ) -> Result<GenerationOutput, GenerationError>;

    /// Decode a cumulative token sequence to text.
    fn decode(&self, tokens: &[TokenId]) -> String;
}
