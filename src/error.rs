use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    #[error("No file loaded. Use `load <path>` first.")]
    NoFileLoaded,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TxError>;
