//! Error type for the leader-following client.
//!
//! Network failures and leadership errors are folded into one recoverable
//! class (`ClientError::Unavailable`) once the client's own retry budget is
//! exhausted; everything else — a malformed response, a caller bug — is
//! surfaced as a distinct variant so it isn't silently retried forever.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("cannot connect after {attempts} tries: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("request rejected: {0}")]
    Rejected(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
