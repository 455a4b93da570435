use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OAuth2 error during {operation}: status {status:?}: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("no identity token in session storage")]
    MissingIdentityToken,
    #[error("federation error during {operation}: {detail}")]
    Federation {
        operation: &'static str,
        detail: String,
    },
    /// Failure fanned out to every waiter of a coalesced in-flight exchange.
    #[error("{0}")]
    Shared(Arc<Error>),
}
