//! Deterministic in-memory engine.
//!
//! Replies are scripted per model id. Tokens are the whitespace-inclusive
//! pieces of the reply, interned into a per-session vocabulary, so decoding
//! a prefix of the token stream yields a prefix of the reply text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::watch;

use crate::{
    ChatMessage, GenerationError, GenerationOutput, GenerationParameters, InferenceEngine,
    LoadError, MessageRole, ModelDescriptor, ProgressCallback, Session, TokenDisposition, TokenId,
};

/// What a scripted session answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Fixed(String),
    /// "You said: <last user message>"
    Echo,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub reply: Reply,
    pub parameter_count: u64,
    /// Cycle through the reply until the token callback stops generation
    pub repeat: bool,
    pub progress_steps: u32,
    pub load_failure: Option<LoadError>,
    /// Fail once this many tokens have been produced
    pub generation_failure: Option<(usize, GenerationError)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reply: Reply::Echo,
            parameter_count: 134_515_008,
            repeat: false,
            progress_steps: 4,
            load_failure: None,
            generation_failure: None,
        }
    }
}

impl Script {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Reply::Fixed(text.into()),
            ..Self::default()
        }
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn with_parameter_count(mut self, count: u64) -> Self {
        self.parameter_count = count;
        self
    }

    pub fn with_progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn failing_load(mut self, error: LoadError) -> Self {
        self.load_failure = Some(error);
        self
    }

    pub fn failing_after(mut self, tokens: usize, error: GenerationError) -> Self {
        self.generation_failure = Some((tokens, error));
        self
    }
}

/// Holds loads at their start until opened. Open by default.
#[derive(Debug, Clone)]
pub struct LoadGate {
    open: Arc<watch::Sender<bool>>,
}

impl LoadGate {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as the gate, so this only returns once open.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Holds generations before their first token until opened. Open by default.
///
/// Blocking, since sessions generate on a blocking worker thread.
#[derive(Debug, Clone)]
pub struct GenerationGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl GenerationGate {
    fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock_ignoring_poison(lock) = true;
        cvar.notify_all();
    }

    pub fn close(&self) {
        *lock_ignoring_poison(&self.inner.0) = false;
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock_ignoring_poison(lock);
        while !*open {
            open = cvar.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    fallback: Script,
    load_calls: Mutex<HashMap<String, usize>>,
    cache_limit: AtomicUsize,
    cache_limit_sets: AtomicUsize,
    cache_clears: AtomicUsize,
    generation_calls: AtomicUsize,
    last_seed: Mutex<Option<u64>>,
    load_gate: LoadGate,
    generation_gate: GenerationGate,
}

/// Scripted [`InferenceEngine`] that records every call made against it.
#[derive(Clone)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    /// Engine answering every model with `fallback` unless scripted otherwise.
    pub fn new(fallback: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                scripts: Mutex::new(HashMap::new()),
                fallback,
                load_calls: Mutex::new(HashMap::new()),
                cache_limit: AtomicUsize::new(0),
                cache_limit_sets: AtomicUsize::new(0),
                cache_clears: AtomicUsize::new(0),
                generation_calls: AtomicUsize::new(0),
                last_seed: Mutex::new(None),
                load_gate: LoadGate::new(),
                generation_gate: GenerationGate::new(),
            }),
        }
    }

    /// Engine that echoes the user's prompt back for every model.
    pub fn echo() -> Self {
        Self::new(Script::default())
    }

    pub fn with_script(self, model_id: impl Into<String>, script: Script) -> Self {
        self.set_script(model_id, script);
        self
    }

    /// Replace the script for `model_id`. Applies to the next load.
    pub fn set_script(&self, model_id: impl Into<String>, script: Script) {
        lock_ignoring_poison(&self.shared.scripts).insert(model_id.into(), script);
    }

    pub fn load_gate(&self) -> LoadGate {
        self.shared.load_gate.clone()
    }

    pub fn generation_gate(&self) -> GenerationGate {
        self.shared.generation_gate.clone()
    }

    /// Number of `load` calls issued for `model_id`.
    pub fn load_calls(&self, model_id: &str) -> usize {
        lock_ignoring_poison(&self.shared.load_calls)
            .get(model_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_load_calls(&self) -> usize {
        lock_ignoring_poison(&self.shared.load_calls).values().sum()
    }

    pub fn cache_limit(&self) -> usize {
        self.shared.cache_limit.load(Ordering::SeqCst)
    }

    pub fn cache_limit_sets(&self) -> usize {
        self.shared.cache_limit_sets.load(Ordering::SeqCst)
    }

    pub fn cache_clears(&self) -> usize {
        self.shared.cache_clears.load(Ordering::SeqCst)
    }

    pub fn generation_calls(&self) -> usize {
        self.shared.generation_calls.load(Ordering::SeqCst)
    }

    pub fn last_seed(&self) -> Option<u64> {
        *lock_ignoring_poison(&self.shared.last_seed)
    }

    fn script_for(&self, model_id: &str) -> Script {
        lock_ignoring_poison(&self.shared.scripts)
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| self.shared.fallback.clone())
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn set_cache_limit(&self, bytes: usize) {
        self.shared.cache_limit.store(bytes, Ordering::SeqCst);
        self.shared.cache_limit_sets.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_cache(&self) {
        debug!("Clearing scripted engine scratch cache");
        self.shared.cache_clears.fetch_add(1, Ordering::SeqCst);
    }

    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: ProgressCallback,
    ) -> Result<Arc<dyn Session>, LoadError> {
        let script = self.script_for(&descriptor.id);
        {
            let mut calls = lock_ignoring_poison(&self.shared.load_calls);
            *calls.entry(descriptor.id.clone()).or_insert(0) += 1;
        }
        info!(
            "Loading scripted model '{}' from {}",
            descriptor.id, descriptor.repo_id
        );

        self.shared.load_gate.pass().await;

        let steps = script.progress_steps.max(1);
        for step in 1..=steps {
            on_progress(f64::from(step) / f64::from(steps));
            tokio::task::yield_now().await;
        }

        if let Some(error) = script.load_failure.clone() {
            return Err(error);
        }

        Ok(Arc::new(ScriptedSession {
            descriptor: descriptor.clone(),
            script,
            vocabulary: Mutex::new(Vec::new()),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ScriptedSession {
    descriptor: ModelDescriptor,
    script: Script,
    vocabulary: Mutex<Vec<String>>,
    shared: Arc<Shared>,
}

impl ScriptedSession {
    fn reply_text(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| GenerationError::Encoding("no user message".to_string()))?;

        Ok(match &self.script.reply {
            Reply::Fixed(text) => text.clone(),
            Reply::Echo => format!("You said: {}", prompt),
        })
    }

    fn encode(&self, text: &str) -> Vec<TokenId> {
        let mut vocabulary = lock_ignoring_poison(&self.vocabulary);
        text.split_inclusive(' ')
            .map(|piece| {
                let index = match vocabulary.iter().position(|known| known == piece) {
                    Some(index) => index,
                    None => {
                        vocabulary.push(piece.to_string());
                        vocabulary.len() - 1
                    }
                };
                index as TokenId
            })
            .collect()
    }
}

impl Session for ScriptedSession {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn parameter_count(&self) -> u64 {
        self.script.parameter_count
    }

    fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: &GenerationParameters,
        seed: u64,
        on_tokens: &mut dyn FnMut(&[TokenId]) -> TokenDisposition,
    ) -> Result<GenerationOutput, GenerationError> {
        *lock_ignoring_poison(&self.shared.last_seed) = Some(seed);
        self.shared.generation_calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Scripted generation on '{}' (seed={}, temperature={}, top_p={})",
            self.descriptor.id, seed, parameters.temperature, parameters.top_p
        );

        let script_tokens = self.encode(&self.reply_text(messages)?);
        self.shared.generation_gate.wait();

        let start = Instant::now();
        let mut tokens: Vec<TokenId> = Vec::new();
        while !script_tokens.is_empty()
            && (self.script.repeat || tokens.len() < script_tokens.len())
        {
            if let Some((after, error)) = &self.script.generation_failure {
                if tokens.len() >= *after {
                    return Err(error.clone());
                }
            }
            tokens.push(script_tokens[tokens.len() % script_tokens.len()]);
            if on_tokens(&tokens) == TokenDisposition::Stop {
                break;
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        let tokens_per_second = if elapsed > 0.0 {
            tokens.len() as f64 / elapsed
        } else {
            0.0
        };

        Ok(GenerationOutput {
            text: self.decode(&tokens),
            token_count: tokens.len(),
            tokens_per_second,
        })
    }

    fn decode(&self, tokens: &[TokenId]) -> String {
        let vocabulary = lock_ignoring_poison(&self.vocabulary);
        tokens
            .iter()
            .filter_map(|&token| vocabulary.get(token as usize))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, format!("test/{id}"))
    }

    fn prompt(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user(text)]
    }

    #[tokio::test]
    async fn test_echo_reply_decodes_prefixes() {
        let engine = ScriptedEngine::echo();
        let session = engine
            .load(&descriptor("a"), Box::new(|_| {}))
            .await
            .unwrap();

        let mut partials = Vec::new();
        let output = session
            .generate(&prompt("hello there"), &GenerationParameters::default(), 1, &mut |t: &[TokenId]| {
                partials.push(session.decode(t));
                TokenDisposition::Continue
            })
            .unwrap();

        assert_eq!(output.text, "You said: hello there");
        assert_eq!(output.token_count, 4);
        assert_eq!(partials.first().map(String::as_str), Some("You "));
        assert_eq!(partials.last(), Some(&output.text));
    }

    #[tokio::test]
    async fn test_repeating_script_stops_on_callback() {
        let engine = ScriptedEngine::new(Script::reply("a b c").repeating());
        let session = engine
            .load(&descriptor("a"), Box::new(|_| {}))
            .await
            .unwrap();

        let output = session
            .generate(&prompt("x"), &GenerationParameters::default(), 1, &mut |t: &[TokenId]| {
                if t.len() >= 10 {
                    TokenDisposition::Stop
                } else {
                    TokenDisposition::Continue
                }
            })
            .unwrap();

        assert_eq!(output.token_count, 10);
        assert!(output.text.starts_with("a b ca b c"));
        assert_eq!(engine.generation_calls(), 1);
        assert_eq!(engine.last_seed(), Some(1));
    }

    #[tokio::test]
    async fn test_load_reports_progress_and_failures() {
        let engine = ScriptedEngine::echo().with_script(
            "broken",
            Script::default()
                .with_progress_steps(2)
                .failing_load(LoadError::FetchFailed("offline".into())),
        );

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let result = engine
            .load(
                &descriptor("broken"),
                Box::new(move |f| sink.lock().unwrap().push(f)),
            )
            .await;

        assert!(matches!(result, Err(LoadError::FetchFailed(_))));
        assert_eq!(*progress.lock().unwrap(), vec![0.5, 1.0]);
        assert_eq!(engine.load_calls("broken"), 1);
        assert_eq!(engine.load_calls("other"), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_after_tokens() {
        let engine = ScriptedEngine::new(
            Script::reply("one two three").failing_after(2, GenerationError::Engine("boom".into())),
        );
        let session = engine
            .load(&descriptor("a"), Box::new(|_| {}))
            .await
            .unwrap();

        let mut seen = 0;
        let result = session.generate(&prompt("x"), &GenerationParameters::default(), 1, &mut |t: &[TokenId]| {
            seen = t.len();
            TokenDisposition::Continue
        });

        assert_eq!(result, Err(GenerationError::Engine("boom".into())));
        assert_eq!(seen, 2);
    }
}
