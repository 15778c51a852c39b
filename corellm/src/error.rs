use derive_more::{Display, From};

#[derive(Debug, From, Display)]
pub enum Error {
    #[from]
    Config(crate::config::ConfigError),

    #[from]
    Controller(crate::chat::HandleError),

    #[from]
    Io(std::io::Error),

    #[from]
    Logger(log::SetLoggerError),
}

impl std::error::Error for Error {}
