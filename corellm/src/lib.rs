pub mod chat;
pub mod config;
pub mod error;
mod logging;
pub mod models;
mod repl;
pub mod setup;

use std::sync::Arc;

use corellm_engine::ScriptedEngine;

pub use error::Error;

pub async fn run() -> Result<(), Error> {
    logging::init()?;

    let engine = Arc::new(ScriptedEngine::echo());
    let app = setup::setup_app(engine).await?;

    repl::run(app.handle, app.catalog, &app.store, app.config).await
}
