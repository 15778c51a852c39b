use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::commands::ChatCommand;
use super::events::ChatEvent;
use super::ChatSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("chat controller has stopped")]
    ControllerStopped,
}

/// Cloneable front door to a running chat controller.
///
/// The controller stops once every handle is dropped.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
    snapshots: watch::Receiver<ChatSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<ChatCommand>,
        snapshots: watch::Receiver<ChatSnapshot>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            commands,
            snapshots,
            events,
        }
    }

    pub async fn select_model(&self, id: impl Into<String>) -> Result<(), HandleError> {
        self.send(ChatCommand::SelectModel(id.into())).await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), HandleError> {
        self.send(ChatCommand::SendMessage(text.into())).await
    }

    pub async fn retry_load(&self) -> Result<(), HandleError> {
        self.send(ChatCommand::RetryLoad).await
    }

    pub async fn enter_background(&self) -> Result<(), HandleError> {
        self.send(ChatCommand::EnterBackground).await
    }

    /// State after every previously sent command has been handled.
    pub async fn current_snapshot(&self) -> Result<ChatSnapshot, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChatCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| HandleError::ControllerStopped)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: ChatCommand) -> Result<(), HandleError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HandleError::ControllerStopped)
    }
}
