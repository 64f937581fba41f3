// Error types for the store, pairing and session layers.

use thiserror::Error;

/// Failure talking to the rating store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("player {0} not found")]
    PlayerNotFound(String),
    #[error("malformed store response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("need at least 2 players to build a pair, have {available}")]
    InsufficientPopulation { available: usize },
}

/// Caller-visible failure from the vote session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("need at least 2 players to build a pair, have {available}")]
    InsufficientPopulation { available: usize },
    #[error("store request failed: {0}")]
    RemoteUpdateFailure(#[source] StoreError),
    #[error("vote task aborted: {0}")]
    VoteTaskFailed(String),
}

impl From<PairingError> for SessionError {
    fn from(e: PairingError) -> Self {
        match e {
            PairingError::InsufficientPopulation { available } => {
                SessionError::InsufficientPopulation { available }
            }
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::RemoteUpdateFailure(e)
    }
}
