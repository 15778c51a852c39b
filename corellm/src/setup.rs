use std::sync::Arc;

use corellm_engine::InferenceEngine;
use log::info;
use tokio::sync::{broadcast, mpsc, watch};

use crate::chat::{ChatHandle, ChatSnapshot, Controller, ControllerSettings};
use crate::config::{self, FileStore};
use crate::error::Error;
use crate::models::ModelCatalog;

/// Bound on queued user intents
pub const COMMAND_CHANNEL_CAPACITY: usize = 100;
/// Events a slow subscriber may fall behind before it starts skipping
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Wire the channels and spawn the chat controller on the current runtime.
pub fn spawn_controller(
    engine: Arc<dyn InferenceEngine>,
    catalog: ModelCatalog,
    settings: ControllerSettings,
) -> ChatHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::initial());
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let controller = Controller::new(
        command_rx,
        snapshot_tx,
        event_tx.clone(),
        engine,
        catalog,
        settings,
    );
    tokio::spawn(controller.run());

    ChatHandle::new(command_tx, snapshot_rx, event_tx)
}

pub struct App {
    pub handle: ChatHandle,
    pub catalog: ModelCatalog,
    pub store: FileStore,
    pub config: config::ChatConfig,
}

/// Load the config, start the controller and kick off loading the configured model.
pub async fn setup_app(engine: Arc<dyn InferenceEngine>) -> Result<App, Error> {
    info!("CoreLLM v{}", env!("CARGO_PKG_VERSION"));

    let store = FileStore::open(FileStore::default_path()?)?;
    let chat_config = config::load_chat_config(&store);
    let catalog = ModelCatalog::builtin();

    let handle = spawn_controller(
        engine,
        catalog.clone(),
        ControllerSettings::from(&chat_config),
    );

    if let Some(model) = chat_config.selected_model.as_deref() {
        handle.select_model(model).await?;
    }

    Ok(App {
        handle,
        catalog,
        store,
        config: chat_config,
    })
}
