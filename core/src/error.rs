use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input, rejected before storage or the network is touched.
    #[error("{0}")]
    Validation(String),

    #[error("storage error while trying to {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Migration or initial schema creation failed. Fatal at startup.
    #[error("database setup failed: {message}")]
    Setup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote service answered, but not with the shape we expect.
    #[error("unexpected response from {url} (status {status})")]
    RemoteContract {
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {message}")]
    RemoteRequest {
        url: String,
        status: Option<u16>,
        message: String,
    },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn setup(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Setup {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteContract { .. } | Self::RemoteRequest { .. })
    }
}

/// Wrap a rusqlite error as [`Error::Storage`], logging it where it happened.
pub(crate) fn storage(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |source| {
        tracing::error!(op, error = %source, "storage operation failed");
        Error::Storage { op, source }
    }
}
