//! Error types for the pgpworkbench library.
//!
//! [`Error`] is the structured failure category reported by a crypto
//! backend. Callers of the workflows never see it directly: every failure
//! is turned into a [`ClassifiedError`](crate::ClassifiedError) by
//! [`classify`](crate::classify).

use thiserror::Error;

use crate::armor::ArmorError;

/// The failure categories a crypto backend reports.
#[derive(Error, Debug)]
pub enum Error {
    /// Cryptographic operation failed
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Key parsing failed
    #[error("Key parsing failed: {0}")]
    Parse(String),

    /// The armor framing of a key input is broken
    #[error("Malformed key armor: {0}")]
    KeyArmor(#[source] ArmorError),

    /// The armor framing of a message or signature input is broken
    #[error("Malformed message armor: {0}")]
    MessageArmor(#[source] ArmorError),

    /// Message packets could not be parsed
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Invalid password or unable to decrypt secret key
    #[error("Invalid password or key")]
    InvalidPassword,

    /// The secret key is protected and no passphrase was given
    #[error("Secret key is passphrase-protected")]
    PassphraseRequired,

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Key does not contain secret key material
    #[error("Key does not contain secret key material")]
    NoSecretKey,

    /// A private key was supplied where only a public key is accepted
    #[error("Expected a public key, found a private key")]
    UnexpectedSecretKey,

    /// No suitable encryption subkey found
    #[error("No suitable encryption subkey found")]
    NoEncryptionSubkey,

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Input exceeds the configured size limit
    #[error("Input of {size} bytes exceeds the limit of {limit} bytes")]
    InputTooLarge {
        /// Size of the rejected input
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking task running a backend call did not finish
    #[error("Background task failed: {0}")]
    Task(String),

    /// Configuration could not be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A specialized Result type for pgpworkbench operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
