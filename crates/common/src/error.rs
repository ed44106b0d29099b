//! Request-level errors shared by Wagerline crates
//!
//! These cover malformed input arriving from outside the engine (ids, side
//! names, coin kinds). Engine, store and ledger failures have their own
//! error types in the crates that own them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("'{value}' is not a valid {kind} id")]
    InvalidId { kind: &'static str, value: String },

    #[error("invalid side '{0}'. Use 'reference' or 'opposing'")]
    InvalidSide(String),

    #[error("invalid coin kind '{0}'. Use 'play' or 'stakes'")]
    UnknownCoinKind(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_id(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidId {
            kind,
            value: value.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_bad_value() {
        assert_eq!(
            Error::invalid_id("bet", "abc").to_string(),
            "'abc' is not a valid bet id"
        );
        assert_eq!(
            Error::UnknownCoinKind("gold".into()).to_string(),
            "invalid coin kind 'gold'. Use 'play' or 'stakes'"
        );
        assert_eq!(Error::MissingField("user_id").to_string(), "user_id is required");
    }

    #[test]
    fn test_serde_error_converts() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
