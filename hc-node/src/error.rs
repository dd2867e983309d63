//! Error taxonomy for the protocol multiplexer, plus the wire-level
//! [`ErrorResponse`] used to carry a typed error back to a requester.

use displaydoc::Display;
use hc_hash::Hash;
use thiserror::Error;

use crate::message::MsgType;

/// Errors that can occur sending, receiving, or dispatching a message.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// hash not found
    HashNotFound,

    /// hash has been deleted
    HashDeleted,

    /// hash has been modified, replacement: {0}
    HashModified(Hash),

    /// hash was rejected by validation
    HashRejected,

    /// link not found
    LinkNotFound,

    /// entry type mismatch
    EntryTypeMismatch,

    /// peer is blocklisted
    Blocklisted,

    /// message type {0} is not valid on the {1} protocol
    ProtocolMismatch(&'static str, &'static str),

    /// message has no `from` field
    MissingFrom,

    /// no gossipers available in the neighborhood
    NoGossipersAvailable,

    /// expected a gossip request body
    ExpectedGossipRequest,

    /// no such index: {0}
    NoSuchIndex(u64),

    /// transport error: {0}
    Transport(String),

    /// wire encoding error: {0}
    Encoding(String),

    /// an error with no assigned wire code: {0}
    Other(String),
}

impl Error {
    /// Maps this error onto the wire's 8-slot error-code table, falling back
    /// to the generic unknown-error slot with the message carried alongside.
    pub fn to_code(&self) -> u8 {
        match self {
            Error::HashNotFound => 1,
            Error::HashDeleted => 2,
            Error::HashModified(_) => 3,
            Error::HashRejected => 4,
            Error::LinkNotFound => 5,
            Error::EntryTypeMismatch => 6,
            Error::Blocklisted => 7,
            _ => 0,
        }
    }
}

/// The `{ code, message }` envelope sent back over the wire in place of an
/// [`Error`] value, since the concrete [`Error`] variants are not meaningful
/// to a remote peer running different code.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub code: u8,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let code = err.to_code();
        let message = match (code, err) {
            (0, _) => err.to_string(),
            // `ErrorResponse` has no dedicated payload slot (§6); the one
            // structured code that needs to carry data besides its code
            // reuses `message` for the replacement hash's wire encoding.
            (3, Error::HashModified(replacement)) => replacement.to_string(),
            _ => String::new(),
        };
        ErrorResponse { code, message }
    }
}

impl From<ErrorResponse> for Error {
    fn from(resp: ErrorResponse) -> Self {
        match resp.code {
            1 => Error::HashNotFound,
            2 => Error::HashDeleted,
            3 => match resp.message.parse::<Hash>() {
                Ok(replacement) => Error::HashModified(replacement),
                Err(_) => Error::Other("hash modified, but the replacement hash was unparseable".into()),
            },
            4 => Error::HashRejected,
            5 => Error::LinkNotFound,
            6 => Error::EntryTypeMismatch,
            7 => Error::Blocklisted,
            _ => Error::Other(resp.message),
        }
    }
}

/// Builds a [`Error::ProtocolMismatch`] for a message type not admissible on
/// a given protocol.
pub fn protocol_mismatch(msg_type: MsgType, protocol: &'static str) -> Error {
    Error::ProtocolMismatch(msg_type.name(), protocol)
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_errors_round_trip_through_their_code() {
        let known = [
            Error::HashNotFound,
            Error::HashDeleted,
            Error::HashRejected,
            Error::LinkNotFound,
            Error::EntryTypeMismatch,
            Error::Blocklisted,
        ];
        for err in known {
            let resp = ErrorResponse::from(&err);
            let back: Error = resp.into();
            assert_eq!(back.to_code(), err.to_code());
        }
    }

    #[test]
    fn hash_modified_round_trips_its_replacement_hash() {
        let replacement = Hash::of(b"replacement");
        let err = Error::HashModified(replacement);
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, 3);
        let back: Error = resp.into();
        match back {
            Error::HashModified(h) => assert_eq!(h, replacement),
            other => panic!("expected HashModified, got {other:?}"),
        }
    }

    #[test]
    fn unknown_error_carries_its_message_through_code_zero() {
        let err = Error::Transport("connection reset".into());
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, 0);
        assert_eq!(resp.message, err.to_string());
        let back: Error = resp.into();
        assert_eq!(back.to_code(), 0);
    }
}
