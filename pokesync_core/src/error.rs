use std::error::Error as StdError;

/// Failure while fetching or normalizing one entity from the remote source.
///
/// Always local to a single queue item: the batch converts it into a failure
/// finalize and keeps going.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("primary record not found: {id}")]
    PrimaryNotFound { id: i64 },

    #[error("secondary record not found: {reference}")]
    SecondaryNotFound { reference: String },

    #[error("malformed response shape: {0}")]
    MalformedResponse(String),

    #[error("network/timeout: {context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

impl FetchError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn transport(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Common error type for `pokesync_core`.
///
/// Store implementations preserve the underlying sqlx error chain via
/// `Error::store`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {context}")]
    Store {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("invocation deadline of {seconds}s exceeded")]
    DeadlineExceeded { seconds: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "pokesync.error.store", skip(source))]
    pub fn store(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True for the failures a caller caused (bad credential, bad input).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Unauthorized(_) | Error::InvalidInput(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self::Store {
            context: "sqlx".into(),
            source: Box::new(value),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_keep_their_category_in_the_message() {
        let err = Error::from(FetchError::PrimaryNotFound { id: 25 });
        assert_eq!(
            err.to_string(),
            "fetch error: primary record not found: 25"
        );

        let err = FetchError::transport("GET /pokemon/1", std::io::Error::other("reset"));
        assert!(err.to_string().starts_with("network/timeout"));
        assert!(err.source().is_some());
    }

    #[test]
    fn only_auth_and_input_are_client_errors() {
        assert!(Error::Unauthorized("x".into()).is_client_error());
        assert!(Error::InvalidInput("x".into()).is_client_error());
        assert!(!Error::DeadlineExceeded { seconds: 60 }.is_client_error());
        assert!(!Error::Internal("x".into()).is_client_error());
    }
}
