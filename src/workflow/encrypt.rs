use zeroize::Zeroizing;

use super::{lease_required, Engine, Field, Operation};
use crate::backend::CryptoBackend;
use crate::classify::ClassifiedError;
use crate::config::Config;
use crate::error::Error;
use crate::session::{SecretText, Wipe};
use crate::types::{KeyInfo, KeyKind, OperationKind};

/// Encrypt inputs: recipient public keys and the plaintext.
#[derive(Debug, Default)]
pub struct EncryptFields {
    /// Armored recipient public keys
    pub recipients: Vec<SecretText>,
    /// Plaintext to encrypt
    pub message: SecretText,
    /// Armored `PGP MESSAGE`
    pub output: Option<SecretText>,
}

/// Inputs copied out for one encryption.
pub struct EncryptLease {
    recipients: Vec<Zeroizing<String>>,
    message: Zeroizing<String>,
}

impl Wipe for EncryptFields {
    fn wipe(&mut self) {
        self.recipients.wipe();
        self.message.wipe();
        self.output.wipe();
    }
}

impl Operation for EncryptFields {
    const KIND: OperationKind = OperationKind::Encrypt;
    type Lease = EncryptLease;
    type Output = String;

    fn set_field(&mut self, field: Field, value: &str) -> Result<(), ClassifiedError> {
        match field {
            Field::PublicKey => {
                self.recipients.wipe();
                if !value.trim().is_empty() {
                    self.recipients.push(SecretText::from(value));
                }
            }
            Field::Message => self.message.set(value),
            other => return Err(Self::unknown_field(other)),
        }
        Ok(())
    }

    fn key_texts(&self) -> Vec<Zeroizing<String>> {
        self.recipients.iter().map(SecretText::lease).collect()
    }

    fn has_sensitive_data(&self) -> bool {
        !self.message.is_empty()
            || self.output.is_some()
            || self.recipients.iter().any(|r| !r.is_empty())
    }

    fn check_key(info: &KeyInfo) -> crate::Result<()> {
        if info.kind != KeyKind::Public {
            return Err(Error::UnexpectedSecretKey);
        }
        if !info.can_encrypt() {
            return Err(Error::NoEncryptionSubkey);
        }
        Ok(())
    }

    fn lease(&self, _config: &Config) -> Result<Self::Lease, ClassifiedError> {
        let message = lease_required(&self.message, || {
            ClassifiedError::invalid_message("Please enter a message to encrypt")
        })?;
        Ok(EncryptLease {
            recipients: self.key_texts(),
            message,
        })
    }

    fn run(backend: &dyn CryptoBackend, lease: Self::Lease) -> crate::Result<Self::Output> {
        let recipients: Vec<&str> = lease.recipients.iter().map(|r| r.trim()).collect();
        backend.encrypt(lease.message.as_bytes(), &recipients)
    }

    fn commit(&mut self, output: Self::Output) {
        self.output.wipe();
        self.output = Some(SecretText::new(output));
    }
}

impl Engine<EncryptFields> {
    /// Add a recipient public key. Existing recipients are kept.
    pub fn add_recipient(&self, armored: &str) -> Result<(), ClassifiedError> {
        self.update_keys(|fields| {
            fields.recipients.push(SecretText::from(armored));
            Ok(())
        })
    }

    /// Remove the recipient at `index`. Returns whether one was removed;
    /// an index past the end leaves the workflow untouched.
    pub fn remove_recipient(&self, index: usize) -> bool {
        let mut session = self.lock();
        if index >= session.fields.recipients.len() {
            return false;
        }
        session.fields.recipients.remove(index).wipe();
        Self::key_changed(&mut session);
        true
    }

    /// Number of recipients.
    pub fn recipient_count(&self) -> usize {
        self.with_state(|state| state.fields.recipients.len())
    }

    /// Inspected recipient keys, in recipient order.
    pub fn recipient_infos(&self) -> Vec<KeyInfo> {
        self.with_state(|state| state.keys.clone())
    }

    /// The armored ciphertext of the last successful run.
    pub fn output(&self) -> Option<String> {
        self.with_state(|state| state.fields.output.as_ref().map(|o| o.expose().to_owned()))
    }
}
