use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Inconsistent or unsupported routing configuration, or a resolver bug.
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid search_after: {0}")]
    InvalidSearchAfter(String),

    #[error("Too many async queries: {0}")]
    TooManyAsyncQueries(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Query job panicked: {0}")]
    JobPanicked(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coarse classification used at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Routing,
    NotFound,
    Malformed,
    Capacity,
    Execution,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Routing(_) | Self::Config(_) => ErrorCategory::Routing,
            Self::IndexNotFound(_) | Self::NoSuchTable(_) => ErrorCategory::NotFound,
            Self::MalformedRequest(_) | Self::InvalidSearchAfter(_) | Self::Json(_) => {
                ErrorCategory::Malformed
            }
            Self::TooManyAsyncQueries(_) => ErrorCategory::Capacity,
            Self::Execution(_)
            | Self::JobPanicked(_)
            | Self::Translation(_)
            | Self::Backend(_)
            | Self::Cancelled(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Toml(_) => ErrorCategory::Execution,
        }
    }

    /// Short label for metrics and logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Routing(_) => "routing",
            Self::IndexNotFound(_) => "index_not_found",
            Self::NoSuchTable(_) => "no_such_table",
            Self::MalformedRequest(_) => "malformed_request",
            Self::InvalidSearchAfter(_) => "invalid_search_after",
            Self::TooManyAsyncQueries(_) => "too_many_async_queries",
            Self::Execution(_) => "execution",
            Self::JobPanicked(_) => "job_panicked",
            Self::Translation(_) => "translation",
            Self::Backend(_) => "backend",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Toml(_) => "toml",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
