//! Error classification.
//!
//! Maps a backend [`Error`] onto the closed [`ErrorKind`] taxonomy and tags
//! it with the input field it belongs to. The mapping is a single
//! exhaustive `match` over the backend's error categories; adding a
//! category to [`Error`] does not compile until it is classified here.

use serde::Serialize;
use thiserror::Error;

use crate::error::Error;
use crate::types::OperationKind;

/// What went wrong, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The key text is not a usable key of the expected kind
    InvalidKeyFormat,
    /// The passphrase did not unlock the secret key
    WrongPassphrase,
    /// The secret key is protected and no passphrase was supplied
    PassphraseRequired,
    /// The message or signature text is malformed
    InvalidMessageFormat,
    /// The cryptographic signature check failed (verify only)
    SignatureMismatch,
    /// Any other backend failure
    OperationFailed,
}

/// The input a classified error should be shown next to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldTag {
    /// The private key input
    PrivateKey,
    /// The public key (or recipient) input
    PublicKey,
    /// The passphrase input
    Passphrase,
    /// The message, signed message or signature input
    Message,
    /// Not tied to any input
    None,
}

impl FieldTag {
    /// The key field of an operation.
    pub fn key_field(operation: OperationKind) -> FieldTag {
        match operation {
            OperationKind::Decrypt | OperationKind::Sign => FieldTag::PrivateKey,
            OperationKind::Encrypt | OperationKind::Verify | OperationKind::Inspect => {
                FieldTag::PublicKey
            }
        }
    }
}

/// A failure ready to be shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct ClassifiedError {
    /// Category
    pub kind: ErrorKind,
    /// Input the error belongs to
    pub field: FieldTag,
    /// Human-readable description
    pub message: String,
}

impl ClassifiedError {
    /// Build a classified error.
    pub fn new(kind: ErrorKind, field: FieldTag, message: impl Into<String>) -> Self {
        Self {
            kind,
            field,
            message: message.into(),
        }
    }

    /// The key field of `operation` is empty.
    pub fn missing_key(operation: OperationKind) -> Self {
        let what = match operation {
            OperationKind::Decrypt | OperationKind::Sign => "a private key",
            OperationKind::Encrypt => "at least one recipient public key",
            OperationKind::Verify => "the signer's public key",
            OperationKind::Inspect => "a key",
        };
        Self::new(
            ErrorKind::InvalidKeyFormat,
            FieldTag::key_field(operation),
            format!("Please provide {what}"),
        )
    }

    /// The message field of `operation` is empty or unusable.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMessageFormat, FieldTag::Message, message)
    }

    /// A passphrase is needed before the operation can run.
    pub fn passphrase_required() -> Self {
        Self::new(
            ErrorKind::PassphraseRequired,
            FieldTag::Passphrase,
            "This key is passphrase-protected. Please enter the passphrase.",
        )
    }
}

/// Classify a backend failure raised while performing `context`.
pub fn classify(raw: &Error, context: OperationKind) -> ClassifiedError {
    let key_field = FieldTag::key_field(context);
    let key_noun = match key_field {
        FieldTag::PrivateKey => "private key",
        _ if context == OperationKind::Inspect => "key",
        _ => "public key",
    };

    let classified = match raw {
        Error::Parse(_) | Error::KeyArmor(_) => ClassifiedError::new(
            ErrorKind::InvalidKeyFormat,
            key_field,
            format!("Invalid {key_noun}: {raw}"),
        ),
        Error::NoSecretKey => ClassifiedError::new(
            ErrorKind::InvalidKeyFormat,
            key_field,
            "Please provide a private key, not a public key",
        ),
        Error::UnexpectedSecretKey => ClassifiedError::new(
            ErrorKind::InvalidKeyFormat,
            key_field,
            "Please provide a public key, not a private key",
        ),
        Error::InvalidPassword => ClassifiedError::new(
            ErrorKind::WrongPassphrase,
            FieldTag::Passphrase,
            "Incorrect passphrase. Please try again.",
        ),
        Error::PassphraseRequired => ClassifiedError::passphrase_required(),
        Error::MalformedMessage(_) | Error::MessageArmor(_) => {
            let what = match context {
                OperationKind::Verify => "signed message",
                _ => "PGP message",
            };
            ClassifiedError::invalid_message(format!("Invalid {what}: {raw}"))
        }
        Error::VerificationFailed if context == OperationKind::Verify => ClassifiedError::new(
            ErrorKind::SignatureMismatch,
            FieldTag::None,
            "The signature does not match the message and key",
        ),
        Error::NoEncryptionSubkey => ClassifiedError::new(
            ErrorKind::OperationFailed,
            key_field,
            "The recipient key has no usable encryption subkey",
        ),
        Error::VerificationFailed
        | Error::Crypto(_)
        | Error::InvalidInput(_)
        | Error::InputTooLarge { .. }
        | Error::Io(_)
        | Error::Task(_)
        | Error::Config(_) => ClassifiedError::new(
            ErrorKind::OperationFailed,
            FieldTag::None,
            format!("{} failed: {raw}", capitalized(context)),
        ),
    };

    tracing::debug!(
        operation = %context,
        kind = ?classified.kind,
        field = ?classified.field,
        "classified backend failure"
    );
    classified
}

fn capitalized(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::Encrypt => "Encryption",
        OperationKind::Decrypt => "Decryption",
        OperationKind::Sign => "Signing",
        OperationKind::Verify => "Verification",
        OperationKind::Inspect => "Inspection",
    }
}
