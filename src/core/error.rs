//! DS-001: Compiler error taxonomy.
//!
//! Every variant is fatal for the pipeline under compilation. There is no
//! partial-success mode: the first error aborts and names the offending key
//! or identifier.

use thiserror::Error;

/// Which identifier namespace a collision happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Task,
    Family,
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Family => write!(f, "family"),
        }
    }
}

/// Compiler error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Configuration root or a value is not null/mapping shaped
    #[error("configuration error at '{key}': {reason}")]
    ConfigurationStructure { key: String, reason: String },

    /// A task or family identifier was already allocated
    #[error("duplicate {kind} identifier '{id}'")]
    DuplicateIdentifier { kind: IdentifierKind, id: String },

    /// Stage kind has no routing table entry
    #[error("unknown stage kind '{0}'")]
    UnknownStageKind(String),

    /// Holistic augmentation requested inside a conditional layer
    #[error("layer '{layer}' is conditional; holistic augmentation needs an explicit merge order")]
    ConditionalHolistic { layer: String },

    /// Identifier cannot be emitted as a Python name
    #[error("'{0}' is not a valid Python identifier")]
    InvalidIdentifier(String),

    /// YAML/JSON (de)serialization failure
    #[error("parse error: {0}")]
    Parse(String),

    /// File system failure
    #[error("cannot access {path}: {message}")]
    Io { path: String, message: String },
}

impl CompileError {
    pub(crate) fn structure(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationStructure {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;
