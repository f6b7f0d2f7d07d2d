use zeroize::Zeroizing;

use super::{lease_optional, lease_required, Engine, Field, Operation};
use crate::armor::{self, BlockKind};
use crate::backend::CryptoBackend;
use crate::classify::{classify, ClassifiedError};
use crate::config::Config;
use crate::error::Error;
use crate::session::{SecretText, Wipe};
use crate::types::{KeyInfo, KeyKind, OperationKind};

/// Decrypt inputs: private key, passphrase and the armored message.
#[derive(Debug, Default)]
pub struct DecryptFields {
    /// Armored private key
    pub private_key: SecretText,
    /// Passphrase for the private key
    pub passphrase: SecretText,
    /// Armored `PGP MESSAGE`
    pub message: SecretText,
    /// Decrypted plaintext
    pub output: Option<SecretText>,
}

/// Inputs copied out for one decryption.
pub struct DecryptLease {
    private_key: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
    message: Zeroizing<String>,
}

impl Wipe for DecryptFields {
    fn wipe(&mut self) {
        self.private_key.wipe();
        self.passphrase.wipe();
        self.message.wipe();
        self.output.wipe();
    }
}

/// Check that `text` is a single armored block of `expected` kind.
pub(crate) fn check_message_armor(
    text: &str,
    expected: BlockKind,
    operation: OperationKind,
    config: &Config,
) -> Result<(), ClassifiedError> {
    let kind = armor::check_single(text, config.require_checksum)
        .map_err(|e| classify(&Error::MessageArmor(e), operation))?;
    if kind != expected {
        let raw = Error::MalformedMessage(format!("expected {}, found {}", expected, kind));
        return Err(classify(&raw, operation));
    }
    Ok(())
}

impl Operation for DecryptFields {
    const KIND: OperationKind = OperationKind::Decrypt;
    type Lease = DecryptLease;
    type Output = Zeroizing<String>;

    fn set_field(&mut self, field: Field, value: &str) -> Result<(), ClassifiedError> {
        match field {
            Field::PrivateKey => self.private_key.set(value),
            Field::Passphrase => self.passphrase.set(value),
            Field::Message => self.message.set(value),
            other => return Err(Self::unknown_field(other)),
        }
        Ok(())
    }

    fn key_texts(&self) -> Vec<Zeroizing<String>> {
        vec![self.private_key.lease()]
    }

    fn passphrase(&self) -> Option<&SecretText> {
        Some(&self.passphrase)
    }

    fn has_sensitive_data(&self) -> bool {
        !self.private_key.is_empty()
            || !self.passphrase.is_empty()
            || !self.message.is_empty()
            || self.output.is_some()
    }

    fn check_key(info: &KeyInfo) -> crate::Result<()> {
        match info.kind {
            KeyKind::Private => Ok(()),
            KeyKind::Public => Err(Error::NoSecretKey),
        }
    }

    fn lease(&self, config: &Config) -> Result<Self::Lease, ClassifiedError> {
        let message = lease_required(&self.message, || {
            ClassifiedError::invalid_message("Please provide an encrypted message")
        })?;
        check_message_armor(message.trim(), BlockKind::Message, Self::KIND, config)?;
        Ok(DecryptLease {
            private_key: self.private_key.lease(),
            passphrase: lease_optional(&self.passphrase),
            message,
        })
    }

    fn run(backend: &dyn CryptoBackend, lease: Self::Lease) -> crate::Result<Self::Output> {
        let plaintext = backend.decrypt(
            lease.message.trim(),
            lease.private_key.trim(),
            lease.passphrase.as_deref().map(String::as_str),
        )?;
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| Error::Crypto("decrypted data is not UTF-8 text".to_string()))?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    fn commit(&mut self, output: Self::Output) {
        self.output.wipe();
        self.output = Some(SecretText::new(output.as_str().to_owned()));
    }
}

impl Engine<DecryptFields> {
    /// The decrypted plaintext, as a copy that is wiped when dropped.
    pub fn output(&self) -> Option<Zeroizing<String>> {
        self.with_state(|state| state.fields.output.as_ref().map(SecretText::lease))
    }
}
