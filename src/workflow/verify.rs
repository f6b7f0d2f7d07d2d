use zeroize::Zeroizing;

use super::decrypt::check_message_armor;
use super::{lease_required, Engine, Field, Operation};
use crate::armor::{self, BlockKind};
use crate::backend::{CryptoBackend, SignedInput};
use crate::classify::{classify, ClassifiedError};
use crate::config::Config;
use crate::error::Error;
use crate::session::{SecretText, Wipe};
use crate::types::{KeyInfo, KeyKind, OperationKind, VerificationResult};

/// Verify inputs: signer public key, signed message (or signed data) and
/// an optional detached signature.
#[derive(Debug, Default)]
pub struct VerifyFields {
    /// Armored signer public key
    pub public_key: SecretText,
    /// Cleartext-signed message, inline-signed message, or the data a
    /// detached signature covers
    pub message: SecretText,
    /// Armored detached signature; empty for cleartext and inline input
    pub signature: SecretText,
    /// Outcome of the last successful run
    pub result: Option<VerificationResult>,
}

/// The signed input copied out for one verification.
pub enum VerifyLease {
    /// `BEGIN PGP SIGNED MESSAGE`
    Cleartext {
        /// Signer key
        public_key: Zeroizing<String>,
        /// The signed message
        text: Zeroizing<String>,
    },
    /// `BEGIN PGP MESSAGE`
    Inline {
        /// Signer key
        public_key: Zeroizing<String>,
        /// The signed message
        armored: Zeroizing<String>,
    },
    /// Data plus `BEGIN PGP SIGNATURE`
    Detached {
        /// Signer key
        public_key: Zeroizing<String>,
        /// The signed data
        data: Zeroizing<String>,
        /// The signature
        signature: Zeroizing<String>,
    },
}

impl Wipe for VerifyFields {
    fn wipe(&mut self) {
        self.public_key.wipe();
        self.message.wipe();
        self.signature.wipe();
        self.result.wipe();
    }
}

impl Operation for VerifyFields {
    const KIND: OperationKind = OperationKind::Verify;
    type Lease = VerifyLease;
    type Output = VerificationResult;

    fn set_field(&mut self, field: Field, value: &str) -> Result<(), ClassifiedError> {
        match field {
            Field::PublicKey => self.public_key.set(value),
            Field::Message => self.message.set(value),
            Field::Signature => self.signature.set(value),
            other => return Err(Self::unknown_field(other)),
        }
        Ok(())
    }

    fn key_texts(&self) -> Vec<Zeroizing<String>> {
        vec![self.public_key.lease()]
    }

    fn has_sensitive_data(&self) -> bool {
        !self.public_key.is_empty()
            || !self.message.is_empty()
            || !self.signature.is_empty()
            || self.result.is_some()
    }

    fn check_key(info: &KeyInfo) -> crate::Result<()> {
        match info.kind {
            KeyKind::Public => Ok(()),
            KeyKind::Private => Err(Error::UnexpectedSecretKey),
        }
    }

    fn lease(&self, config: &Config) -> Result<Self::Lease, ClassifiedError> {
        let public_key = self.public_key.lease();

        if !self.signature.is_blank() {
            let signature = self.signature.lease();
            check_message_armor(signature.trim(), BlockKind::Signature, Self::KIND, config)?;
            return Ok(VerifyLease::Detached {
                public_key,
                data: self.message.lease(),
                signature,
            });
        }

        let message = lease_required(&self.message, || {
            ClassifiedError::invalid_message("Please provide a signed message")
        })?;
        let kind = armor::peek_kind(&message)
            .map_err(|e| classify(&Error::MessageArmor(e), Self::KIND))?;
        match kind {
            BlockKind::SignedMessage => {
                check_message_armor(message.trim(), kind, Self::KIND, config)?;
                Ok(VerifyLease::Cleartext {
                    public_key,
                    text: message,
                })
            }
            BlockKind::Message => {
                check_message_armor(message.trim(), kind, Self::KIND, config)?;
                Ok(VerifyLease::Inline {
                    public_key,
                    armored: message,
                })
            }
            other => {
                let raw = Error::MalformedMessage(format!(
                    "expected a signed message, found {other}; \
                     a detached signature needs the signed data in the message input"
                ));
                Err(classify(&raw, Self::KIND))
            }
        }
    }

    fn run(backend: &dyn CryptoBackend, lease: Self::Lease) -> crate::Result<Self::Output> {
        match &lease {
            VerifyLease::Cleartext { public_key, text } => {
                backend.verify(SignedInput::Cleartext(text.trim()), public_key.trim())
            }
            VerifyLease::Inline {
                public_key,
                armored,
            } => backend.verify(SignedInput::Inline(armored.trim()), public_key.trim()),
            VerifyLease::Detached {
                public_key,
                data,
                signature,
            } => backend.verify(
                SignedInput::Detached {
                    data: data.as_bytes(),
                    signature: signature.trim(),
                },
                public_key.trim(),
            ),
        }
    }

    fn commit(&mut self, output: Self::Output) {
        self.result.wipe();
        self.result = Some(output);
    }
}

impl Engine<VerifyFields> {
    /// Outcome of the last successful verification.
    pub fn result(&self) -> Option<VerificationResult> {
        self.with_state(|state| state.fields.result.clone())
    }
}
