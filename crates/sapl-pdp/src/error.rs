use sapl_core::CompileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdpError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl PdpError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Only internal invariant violations are fatal; everything else is a
    /// rejected configuration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Compile(error) if error.is_fatal())
    }
}

pub type Result<T> = std::result::Result<T, PdpError>;
