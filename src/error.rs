use std::error::Error as _;

use thiserror::Error;

use crate::browser::BrowserError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Couldn't launch the browser: {0}")]
    Launch(#[source] BrowserError),
    #[error("Login failed: {0}")]
    Auth(String),
    #[error("Couldn't recover the browser session: {0}")]
    Recovery(#[source] Box<Error>),
    #[error("Gave up on page {page} after {crashes} browser crashes.")]
    RecoveryExhausted { page: u32, crashes: u32 },
    #[error("The member listing never loaded for page {0}.")]
    ListingNeverLoaded(u32),

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseInvalidSelector(String),

    #[error("Browser Error: {0}")]
    Browser(#[from] BrowserError),
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
    #[error("Upload Error: {0}")]
    Upload(String),
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// The browser session died underneath us. The only error kind that triggers
    /// a relaunch instead of ending the run.
    pub fn is_crash(&self) -> bool {
        matches!(self, Error::Browser(BrowserError::InvalidSession(_)))
    }
}

/// Relational store failures, split by whether another attempt could help.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("query failure: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if is_connection_failure(&err) {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

/// Closed connection, socket I/O failure or SQLSTATE class 08 ("connection
/// exception"). Client-side errors without a SQLSTATE (parameter serialization,
/// row conversion) are query failures.
fn is_connection_failure(err: &tokio_postgres::Error) -> bool {
    let io_failure = err
        .source()
        .is_some_and(|source| source.downcast_ref::<std::io::Error>().is_some());
    connection_class(err.is_closed(), err.code().map(|code| code.code()), io_failure)
}

fn connection_class(closed: bool, sqlstate: Option<&str>, io_failure: bool) -> bool {
    closed || io_failure || sqlstate.is_some_and(|code| code.starts_with("08"))
}
