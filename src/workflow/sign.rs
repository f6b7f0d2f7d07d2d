use zeroize::Zeroizing;

use super::{lease_optional, lease_required, Engine, Field, Operation};
use crate::backend::CryptoBackend;
use crate::classify::ClassifiedError;
use crate::config::Config;
use crate::error::Error;
use crate::session::{SecretText, Wipe};
use crate::types::{KeyInfo, KeyKind, OperationKind};

/// Sign inputs: private key, passphrase, message and output style.
#[derive(Debug, Default)]
pub struct SignFields {
    /// Armored private key
    pub private_key: SecretText,
    /// Passphrase for the private key
    pub passphrase: SecretText,
    /// Text to sign
    pub message: SecretText,
    /// Produce a detached `PGP SIGNATURE` instead of a cleartext-signed
    /// message
    pub detached: bool,
    /// Armored signature or signed message
    pub output: Option<SecretText>,
}

/// Inputs copied out for one signature.
pub struct SignLease {
    private_key: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
    message: Zeroizing<String>,
    detached: bool,
}

impl Wipe for SignFields {
    fn wipe(&mut self) {
        self.private_key.wipe();
        self.passphrase.wipe();
        self.message.wipe();
        self.output.wipe();
        self.detached = false;
    }
}

impl Operation for SignFields {
    const KIND: OperationKind = OperationKind::Sign;
    type Lease = SignLease;
    type Output = String;

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

    fn lease(&self, _config: &Config) -> Result<Self::Lease, ClassifiedError> {
        let message = lease_required(&self.message, || {
            ClassifiedError::invalid_message("Please enter a message to sign")
        })?;
        Ok(SignLease {
            private_key: self.private_key.lease(),
            passphrase: lease_optional(&self.passphrase),
            message,
            detached: self.detached,
        })
    }

    fn run(backend: &dyn CryptoBackend, lease: Self::Lease) -> crate::Result<Self::Output> {
        backend.sign(
            lease.message.as_bytes(),
            lease.private_key.trim(),
            lease.passphrase.as_deref().map(String::as_str),
            lease.detached,
        )
    }

    fn commit(&mut self, output: Self::Output) {
        self.output.wipe();
        self.output = Some(SecretText::new(output));
    }
}

impl Engine<SignFields> {
    /// Choose detached (`true`) or cleartext-signed (`false`) output.
    pub fn set_detached(&self, detached: bool) {
        self.lock().fields.detached = detached;
    }

    /// Whether detached output is selected.
    pub fn detached(&self) -> bool {
        self.with_state(|state| state.fields.detached)
    }

    /// The armored output of the last successful run.
    pub fn output(&self) -> Option<String> {
        self.with_state(|state| state.fields.output.as_ref().map(|o| o.expose().to_owned()))
    }
}
