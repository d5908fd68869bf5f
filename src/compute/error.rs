use thiserror::Error;

use crate::config::errors::{
    ERR_ENTRY_NOT_FOUND, ERR_FETCH, ERR_INSTANTIATION, ERR_INVOCATION, ERR_IO,
    ERR_MALFORMED_RESULT, ERR_MISSING_FILE, ERR_MISSING_PLUGIN, ERR_MODULE_REPORTED,
    ERR_UNSUPPORTED, MISSING_FILE_MESSAGE, MISSING_PLUGIN_MESSAGE,
};

/// Everything that can go wrong between receiving a job and posting its result.
///
/// `Display` is what the worker forwards as the `ERROR` payload, so
/// `ModuleReported` renders the module's own message untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("{msg}", msg = MISSING_PLUGIN_MESSAGE)]
    MissingPluginConfig,
    #[error("{msg}", msg = MISSING_FILE_MESSAGE)]
    MissingFile,
    #[error("{code}: {url}: {reason}", code = ERR_FETCH)]
    FetchFailure { url: String, reason: String },
    #[error("{code}: entry function \"{0}\" not found or not callable", code = ERR_ENTRY_NOT_FOUND)]
    EntryPointNotFound(String),
    #[error("{code}: {0}", code = ERR_INSTANTIATION)]
    InstantiationFailure(String),
    #[error("{code}: module exposes none of process_file, process_binary, process", code = ERR_UNSUPPORTED)]
    UnsupportedModule,
    #[error("{code}: {0}", code = ERR_MALFORMED_RESULT)]
    MalformedResult(String),
    #[error("{0}")]
    ModuleReported(String),
    #[error("{code}: {0}", code = ERR_INVOCATION)]
    Invocation(String),
    #[error("{code}: {0}", code = ERR_IO)]
    Io(String),
}

impl ComputeError {
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable code for logs and telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingPluginConfig => ERR_MISSING_PLUGIN,
            Self::MissingFile => ERR_MISSING_FILE,
            Self::FetchFailure { .. } => ERR_FETCH,
            Self::EntryPointNotFound(_) => ERR_ENTRY_NOT_FOUND,
            Self::InstantiationFailure(_) => ERR_INSTANTIATION,
            Self::UnsupportedModule => ERR_UNSUPPORTED,
            Self::MalformedResult(_) => ERR_MALFORMED_RESULT,
            Self::ModuleReported(_) => ERR_MODULE_REPORTED,
            Self::Invocation(_) => ERR_INVOCATION,
            Self::Io(_) => ERR_IO,
        }
    }
}

impl From<std::io::Error> for ComputeError {
    fn from(err: std::io::Error) -> Self {
        ComputeError::Io(err.to_string())
    }
}

/// Failure raised by a module while an entry point runs (trap, out of memory, bad pointer).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ModuleError(pub String);

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn missing(export: &str) -> Self {
        Self(format!("module does not export '{export}'"))
    }
}

impl From<ModuleError> for ComputeError {
    fn from(err: ModuleError) -> Self {
        ComputeError::Invocation(err.0)
    }
}
