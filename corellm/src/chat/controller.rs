use std::sync::Arc;

use corellm_engine::{
    ChatMessage, GenerationError, GenerationOutput, GenerationParameters, InferenceEngine,
    LoadError, ProgressCallback, Session, TokenDisposition, TokenId,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::{
    commands::ChatCommand,
    events::{ChatEvent, GenerationStateChanged},
    seed::SeedSource,
    state_manager::{ChatStateMachine, LoadEvent, LoadState, TransitionResult},
    transcript::{Role, Transcript},
    ChatSnapshot,
};
use crate::models::{ModelCatalog, ModelLoadingStateChanged, SessionCache, SessionFuture};

pub const THINKING_PLACEHOLDER: &str = "Thinking...";
pub const EMPTY_PARTIAL_PLACEHOLDER: &str = "...";
pub const CANCELLED_MESSAGE: &str = "Generation cancelled.";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
/// 20 MiB of engine scratch memory
pub const DEFAULT_CACHE_LIMIT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub generation: GenerationParameters,
    pub system_prompt: String,
    pub cache_limit_bytes: usize,
    /// Drop the resident session when backgrounded (only while idle)
    pub evict_on_background: bool,
    pub seed: SeedSource,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            generation: GenerationParameters::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            cache_limit_bytes: DEFAULT_CACHE_LIMIT_BYTES,
            evict_on_background: false,
            seed: SeedSource::default(),
        }
    }
}

/// Why a generation run produced no reply.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunFailure {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("generation cancelled")]
    Cancelled,
}

impl RunFailure {
    pub fn user_message(&self) -> String {
        match self {
            RunFailure::Load(e) => e.user_message(),
            RunFailure::Generation(e) => e.user_message(),
            RunFailure::Cancelled => CANCELLED_MESSAGE.to_string(),
        }
    }
}

/// Posted back to the controller by load watchers and generation workers.
enum WorkerMessage {
    LoadProgress {
        epoch: u64,
        fraction: f64,
    },
    LoadFinished {
        epoch: u64,
        result: Result<Arc<dyn Session>, LoadError>,
    },
    Partial {
        run_id: u64,
        token_count: usize,
        text: String,
    },
    GenerationFinished {
        run_id: u64,
        outcome: Result<CompletedRun, RunFailure>,
    },
}

struct CompletedRun {
    session: Arc<dyn Session>,
    output: GenerationOutput,
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    last_token_count: usize,
    last_partial: Option<String>,
}

enum Inbound {
    Command(Option<ChatCommand>),
    Worker(WorkerMessage),
}

/// Owns all chat state. Every mutation happens on the task running [`Controller::run`].
pub struct Controller {
    command_rx: mpsc::Receiver<ChatCommand>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
    event_tx: broadcast::Sender<ChatEvent>,
    catalog: ModelCatalog,
    cache: SessionCache,
    settings: ControllerSettings,
    state: ChatStateMachine,
    transcript: Transcript,
    selected_model: Option<String>,
    status_label: String,
    output: String,
    stat: String,
    // Bumped for every load attempt; results from older attempts are dropped
    epoch: u64,
    load_task: Option<AbortHandle>,
    next_run_id: u64,
    run: Option<ActiveRun>,
}

impl Controller {
    pub fn new(
        command_rx: mpsc::Receiver<ChatCommand>,
        snapshot_tx: watch::Sender<ChatSnapshot>,
        event_tx: broadcast::Sender<ChatEvent>,
        engine: Arc<dyn InferenceEngine>,
        catalog: ModelCatalog,
        settings: ControllerSettings,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let initial = ChatSnapshot::initial();

        Controller {
            command_rx,
            worker_tx,
            worker_rx,
            snapshot_tx,
            event_tx,
            catalog,
            cache: SessionCache::new(engine, settings.cache_limit_bytes),
            settings,
            state: ChatStateMachine::new(),
            transcript: Transcript::new(),
            selected_model: initial.selected_model,
            status_label: initial.status_label,
            output: initial.output,
            stat: initial.stat,
            epoch: 0,
            load_task: None,
            next_run_id: 1,
            run: None,
        }
    }

    /// Main control loop - consumes self, ends once every handle is dropped
    pub async fn run(mut self) {
        log::info!("Chat controller started");
        self.publish();

        loop {
            // Worker results first so a command never observes a stale partial
            let inbound = tokio::select! {
                biased;
                Some(message) = self.worker_rx.recv() => Inbound::Worker(message),
                command = self.command_rx.recv() => Inbound::Command(command),
            };

            match inbound {
                Inbound::Worker(message) => self.handle_worker_message(message),
                Inbound::Command(Some(command)) => self.handle_command(command),
                Inbound::Command(None) => break,
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::SelectModel(id) => self.select_model(id),
            ChatCommand::SendMessage(text) => self.send_message(text),
            ChatCommand::RetryLoad => self.retry_load(),
            ChatCommand::EnterBackground => self.enter_background(),
            ChatCommand::Snapshot(reply) => {
                // Receiver gone means the caller stopped waiting
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::LoadProgress { epoch, fraction } => {
                self.handle_load_progress(epoch, fraction)
            }
            WorkerMessage::LoadFinished { epoch, result } => {
                self.handle_load_finished(epoch, result)
            }
            WorkerMessage::Partial {
                run_id,
                token_count,
                text,
            } => self.handle_partial(run_id, token_count, text),
            WorkerMessage::GenerationFinished { run_id, outcome } => {
                self.handle_generation_finished(run_id, outcome)
            }
        }
    }

    // ===== Commands =====

    fn select_model(&mut self, id: String) {
        let same_model = self.selected_model.as_deref() == Some(id.as_str());
        if same_model && (self.state.is_loading() || self.state.is_ready()) {
            log::debug!("Model '{}' is already {}", id, self.state.current());
            return;
        }

        log::info!("Selecting model '{}'", id);
        self.cancel_active_run();
        self.selected_model = Some(id);
        // Failures are already reflected in state and status
        let _ = self.begin_load();
        self.publish();
    }

    fn send_message(&mut self, prompt: String) {
        if self.state.is_running() {
            log::debug!("Generation already running, dropping message");
            return;
        }
        if prompt.trim().is_empty() {
            log::debug!("Ignoring blank message");
            return;
        }

        self.transcript.append(Role::User, prompt.clone());
        self.transcript.append(Role::Assistant, THINKING_PLACEHOLDER);
        self.emit(GenerationStateChanged::Started {
            prompt: prompt.clone(),
        });

        let session = match self.session_future() {
            Ok(session) => session,
            Err(error) => {
                self.fail_run(None, &RunFailure::Load(error));
                self.publish();
                return;
            }
        };

        if let Err(rejection) = self.state.begin_run() {
            log::warn!("Cannot start generation: {}", rejection);
            self.replace_trailing_reply(format!("Error: {}", rejection));
            self.publish();
            return;
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let cancel = CancellationToken::new();
        self.run = Some(ActiveRun {
            id: run_id,
            cancel: cancel.clone(),
            last_token_count: 0,
            last_partial: None,
        });

        let messages = vec![
            ChatMessage::system(self.settings.system_prompt.clone()),
            ChatMessage::user(prompt),
        ];
        let parameters = self.settings.generation.clone();
        let seed = self.settings.seed.next_seed();
        let worker_tx = self.worker_tx.clone();

        log::info!("Starting generation {} (seed {})", run_id, seed);
        tokio::spawn(async move {
            let outcome = run_generation(
                session,
                messages,
                parameters,
                seed,
                run_id,
                cancel,
                worker_tx.clone(),
            )
            .await;
            let _ = worker_tx.send(WorkerMessage::GenerationFinished { run_id, outcome });
        });

        self.publish();
    }

    fn retry_load(&mut self) {
        let retryable = matches!(
            self.state.current(),
            LoadState::Idle | LoadState::Failed { .. }
        );
        if !retryable {
            log::debug!("Retry ignored in {} state", self.state.current());
            return;
        }

        let _ = self.begin_load();
        self.publish();
    }

    fn enter_background(&mut self) {
        log::info!("Entering background, releasing scratch memory");
        self.cache.release_scratch();

        if !self.settings.evict_on_background {
            return;
        }
        if self.state.is_running() || !self.state.is_ready() {
            log::debug!("Keeping session resident in {} state", self.state.current());
            return;
        }

        self.cache.invalidate();
        self.apply(LoadEvent::Evicted);
        if let Some(id) = self.selected_model.clone() {
            self.status_label = format!("Unloaded {}", self.catalog.display_name(&id));
            self.emit(ModelLoadingStateChanged::Unloaded { model_name: id });
        }
        self.publish();
    }

    // ===== Loading =====

    /// Session future for a new run: the resident session when Ready,
    /// otherwise the in-flight or a freshly started load.
    fn session_future(&mut self) -> Result<SessionFuture, LoadError> {
        if self.state.is_ready() {
            if let Some(id) = self.selected_model.as_deref() {
                let descriptor = self.catalog.resolve(id)?;
                return Ok(self.cache.get_or_load(&descriptor, Box::new(|_| {})));
            }
        }
        self.begin_load()
    }

    /// Start (or join) the load of the selected model and publish its outcome
    /// back to the controller when it settles.
    fn begin_load(&mut self) -> Result<SessionFuture, LoadError> {
        let Some(id) = self.selected_model.clone() else {
            let error = LoadError::NoModelSelected;
            self.fail_load(&error);
            return Err(error);
        };

        let descriptor = match self.catalog.resolve(&id) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                self.fail_load(&error);
                return Err(error);
            }
        };

        if self.state.is_loading() && self.cache.is_pending(&descriptor) {
            return Ok(self.cache.get_or_load(&descriptor, Box::new(|_| {})));
        }

        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.epoch += 1;
        self.apply(LoadEvent::Begin);
        self.status_label = format!("Loading {}...", self.catalog.display_name(&id));
        self.emit(ModelLoadingStateChanged::Started {
            model_name: id.clone(),
        });

        let epoch = self.epoch;
        let progress_tx = self.worker_tx.clone();
        let on_progress: ProgressCallback = Box::new(move |fraction| {
            let _ = progress_tx.send(WorkerMessage::LoadProgress { epoch, fraction });
        });
        let load = self.cache.get_or_load(&descriptor, on_progress);

        let watcher = load.clone();
        let finished_tx = self.worker_tx.clone();
        let task = tokio::spawn(async move {
            let result = watcher.await;
            let _ = finished_tx.send(WorkerMessage::LoadFinished { epoch, result });
        });
        self.load_task = Some(task.abort_handle());

        Ok(load)
    }

    fn handle_load_progress(&mut self, epoch: u64, fraction: f64) {
        if epoch != self.epoch || !self.state.is_loading() {
            return;
        }

        self.apply(LoadEvent::Progress(fraction));
        if let Some(id) = self.selected_model.clone() {
            let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u32;
            self.status_label = format!("Downloading {}: {}%", self.catalog.display_name(&id), percent);
            self.emit(ModelLoadingStateChanged::Progress {
                model_name: id,
                fraction,
            });
        }
        self.publish();
    }

    fn handle_load_finished(&mut self, epoch: u64, result: Result<Arc<dyn Session>, LoadError>) {
        if epoch != self.epoch {
            log::debug!("Discarding result of superseded load (epoch {})", epoch);
            return;
        }

        self.load_task = None;
        self.cache.settle();

        match result {
            Ok(session) => self.mark_loaded(session.as_ref()),
            Err(error) if self.run.is_some() => {
                // The waiting generation reports this failure when it completes
                log::debug!("Load failed with a generation waiting on it: {}", error);
            }
            Err(error) if matches!(self.state.current(), LoadState::Failed { .. }) => {
                log::debug!("Load failure already reported: {}", error);
            }
            Err(error) => self.fail_load(&error),
        }
        self.publish();
    }

    fn mark_loaded(&mut self, session: &dyn Session) {
        if !self.state.is_loading() {
            return;
        }

        self.apply(LoadEvent::Loaded);
        let id = session.descriptor().id.clone();
        let parameter_count = session.parameter_count();
        self.status_label = format!(
            "Loaded {}.  Weights: {}M",
            id,
            parameter_count / (1024 * 1024)
        );
        log::info!("Model '{}' loaded ({} weights)", id, parameter_count);
        self.emit(ModelLoadingStateChanged::Complete {
            model_name: id,
            parameter_count,
        });
    }

    fn fail_load(&mut self, error: &LoadError) {
        log::error!("Failed to load model: {}", error);
        self.apply(LoadEvent::Failed(error.to_string()));
        self.status_label = match self.selected_model.as_deref() {
            Some(id) => format!("Failed to load {}: {}", self.catalog.display_name(id), error),
            None => format!("Failed: {}", error),
        };
        self.emit(ModelLoadingStateChanged::Error {
            model_name: self.selected_model.clone().unwrap_or_default(),
            error: error.to_string(),
        });
    }

    // ===== Generation =====

    fn handle_partial(&mut self, run_id: u64, token_count: usize, text: String) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.id != run_id || token_count <= run.last_token_count {
            return;
        }

        run.last_token_count = token_count;
        run.last_partial = Some(text.clone());

        let shown = if text.is_empty() {
            EMPTY_PARTIAL_PLACEHOLDER.to_string()
        } else {
            text.clone()
        };
        self.output = text.clone();
        self.replace_trailing_reply(shown);
        self.emit(GenerationStateChanged::Partial { token_count, text });
        self.publish();
    }

    fn handle_generation_finished(&mut self, run_id: u64, outcome: Result<CompletedRun, RunFailure>) {
        let run = match self.run.take() {
            Some(run) if run.id == run_id => run,
            other => {
                self.run = other;
                log::debug!("Discarding result of superseded generation {}", run_id);
                return;
            }
        };
        self.state.end_run();

        match outcome {
            Ok(completed) => self.complete_run(completed),
            Err(RunFailure::Cancelled) => log::debug!("Generation {} was cancelled", run_id),
            Err(failure) => self.fail_run(run.last_partial.as_deref(), &failure),
        }
        self.publish();
    }

    fn complete_run(&mut self, completed: CompletedRun) {
        let CompletedRun { session, output } = completed;

        // An implicit load may still be waiting for its watcher
        self.mark_loaded(session.as_ref());

        let unchanged = self
            .transcript
            .last()
            .is_some_and(|entry| entry.content == output.text);
        if !unchanged {
            self.replace_trailing_reply(output.text.clone());
        }
        self.output = output.text.clone();
        self.stat = format!("Tokens/second: {:.3}", output.tokens_per_second);

        log::info!(
            "Generated {} tokens ({:.3} tokens/s)",
            output.token_count,
            output.tokens_per_second
        );
        self.emit(GenerationStateChanged::Complete {
            text: output.text,
            token_count: output.token_count,
            tokens_per_second: output.tokens_per_second,
        });
    }

    /// Surface a failed run: the reply keeps whatever was streamed and
    /// gains the error, and the load state becomes Failed.
    fn fail_run(&mut self, last_partial: Option<&str>, failure: &RunFailure) {
        log::error!("Generation failed: {}", failure);

        let message = format!("Error: {}", failure.user_message());
        let reply = match last_partial {
            Some(partial) if !partial.is_empty() => format!("{}\n\n{}", partial, message),
            _ => message,
        };
        self.replace_trailing_reply(reply);
        self.output = format!("Failed: {}", failure);

        let already_failed = matches!(self.state.current(), LoadState::Failed { .. });
        match failure {
            RunFailure::Load(_) if already_failed => {}
            RunFailure::Load(error) => self.fail_load(error),
            _ => {
                self.apply(LoadEvent::Failed(failure.to_string()));
                self.status_label = format!("Failed: {}", failure);
            }
        }

        self.emit(GenerationStateChanged::Error {
            error_message: failure.to_string(),
            user_message: failure.user_message(),
        });
    }

    /// Detach the active run. Its later messages are discarded.
    fn cancel_active_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        log::info!("Cancelling generation {}", run.id);
        run.cancel.cancel();
        self.state.end_run();
        if run.last_partial.is_none() {
            self.replace_trailing_reply(CANCELLED_MESSAGE);
        }
        self.emit(GenerationStateChanged::Cancelled);
    }

    // ===== Plumbing =====

    fn replace_trailing_reply(&mut self, content: impl Into<String>) {
        let trailing_reply = matches!(
            self.transcript.last(),
            Some(entry) if entry.role == Role::Assistant
        );
        if trailing_reply {
            self.transcript.replace_last(content);
        } else {
            log::warn!("Trailing transcript entry is not a reply, leaving it untouched");
        }
    }

    fn apply(&mut self, event: LoadEvent) {
        match self.state.transition(event) {
            Ok(TransitionResult::Changed { from, to }) => {
                log::debug!("Load state: {} -> {}", from, to);
            }
            Ok(TransitionResult::Unchanged) => {}
            Err(rejection) => {
                log::warn!("{}", rejection);
            }
        }
    }

    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            status_label: self.status_label.clone(),
            transcript: self.transcript.entries().to_vec(),
            running: self.state.is_running(),
            load_state: self.state.current().clone(),
            output: self.output.clone(),
            stat: self.stat.clone(),
            selected_model: self.selected_model.clone(),
        }
    }

    fn publish(&self) {
        debug_assert!(
            self.state.is_consistent(),
            "running in {} state",
            self.state.current()
        );
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn emit(&self, event: impl Into<ChatEvent>) {
        // No subscribers is fine
        let _ = self.event_tx.send(event.into());
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
        self.cache.invalidate();
        log::info!("Chat controller stopped");
    }
}

/// Await the session, then drive `Session::generate` on a blocking thread.
///
/// Partial text is posted every `display_every_n_tokens` tokens; generation
/// stops at `max_tokens` or once `cancel` fires.
async fn run_generation(
    session: SessionFuture,
    messages: Vec<ChatMessage>,
    parameters: GenerationParameters,
    seed: u64,
    run_id: u64,
    cancel: CancellationToken,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
) -> Result<CompletedRun, RunFailure> {
    let session = tokio::select! {
        _ = cancel.cancelled() => return Err(RunFailure::Cancelled),
        loaded = session => loaded?,
    };

    let worker_session = Arc::clone(&session);
    let token_cancel = cancel.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let every = parameters.display_every_n_tokens;
        let max_tokens = parameters.max_tokens;
        let session = worker_session.as_ref();

        session.generate(
            &messages,
            &parameters,
            seed,
            &mut |tokens: &[TokenId]| {
                if token_cancel.is_cancelled() {
                    return TokenDisposition::Stop;
                }

                let count = tokens.len();
                if every > 0 && count % every == 0 {
                    let text = session.decode(tokens);
                    let _ = worker_tx.send(WorkerMessage::Partial {
                        run_id,
                        token_count: count,
                        text,
                    });
                }

                if count >= max_tokens {
                    TokenDisposition::Stop
                } else {
                    TokenDisposition::Continue
                }
            },
        )
    })
    .await;

    if cancel.is_cancelled() {
        return Err(RunFailure::Cancelled);
    }

    let output = joined.map_err(|e| GenerationError::WorkerPanicked(e.to_string()))??;
    Ok(CompletedRun { session, output })
}
