use tokio::sync::oneshot;

use super::ChatSnapshot;

/// User intents consumed by the chat controller
/// These are sent through a channel so every mutation happens on the controller task
#[derive(Debug)]
pub enum ChatCommand {
    /// Switch to the model with this catalog id (loads it)
    SelectModel(String),
    /// Send a chat message to the selected model
    SendMessage(String),
    /// Re-attempt loading the selected model after a failure
    RetryLoad,
    /// The process moved to the background; release cached resources
    EnterBackground,
    /// Reply with the state as of this command
    Snapshot(oneshot::Sender<ChatSnapshot>),
}
