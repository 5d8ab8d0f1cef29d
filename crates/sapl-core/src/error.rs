use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of an AST node within the document it was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceLocation {
    pub document: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(document: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            document: Some(document.into()),
            line,
            column,
        }
    }

    /// Location with no document attached, used for synthetic nodes.
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            document: None,
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.document {
            Some(document) => write!(f, "{document}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// Category of a compilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileErrorKind {
    /// Malformed or statically failing document content.
    Document,
    /// Two documents, policies or imports share a name.
    NameCollision,
    /// Attempt to redefine `subject`, `action`, `resource` or `environment`.
    ReservedIdentifier,
    /// A construct not permitted at the position it appears in.
    UnsupportedStep,
    /// The configuration itself is not acceptable.
    InvalidConfiguration,
    /// Internal invariant violated. Never a domain error.
    Invariant,
}

impl CompileErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::NameCollision => "name collision",
            Self::ReservedIdentifier => "reserved identifier",
            Self::UnsupportedStep => "unsupported construct",
            Self::InvalidConfiguration => "invalid configuration",
            Self::Invariant => "internal invariant violation",
        }
    }
}

/// Structured compilation failure with a formatted message and source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compilation failed ({}): {}", self.kind.as_str(), self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Document error at the given location.
    pub fn at(location: &SourceLocation, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Document, message).with_location(location)
    }

    pub fn name_collision(location: &SourceLocation, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::NameCollision, message).with_location(location)
    }

    pub fn reserved_identifier(location: &SourceLocation, name: &str) -> Self {
        Self::new(
            CompileErrorKind::ReservedIdentifier,
            format!("'{name}' is a reserved identifier and cannot be redefined."),
        )
        .with_location(location)
    }

    pub fn unsupported(location: &SourceLocation, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::UnsupportedStep, message).with_location(location)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::InvalidConfiguration, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Invariant, message)
    }

    #[must_use]
    pub fn with_location(mut self, location: &SourceLocation) -> Self {
        self.location = Some(location.clone());
        self
    }

    /// True for the enumerated class of internal failures.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind == CompileErrorKind::Invariant
    }
}

/// Errors raised by the core data types themselves.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid combining algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid authorization decision: {0}")]
    InvalidDecision(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl CoreError {
    pub fn invalid_algorithm(message: impl Into<String>) -> Self {
        Self::InvalidAlgorithm(message.into())
    }

    pub fn invalid_decision(message: impl Into<String>) -> Self {
        Self::InvalidDecision(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
