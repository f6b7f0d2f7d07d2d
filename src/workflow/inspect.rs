use zeroize::Zeroizing;

use super::{Engine, Field, Operation, Outcome, Workflow};
use crate::backend::CryptoBackend;
use crate::classify::ClassifiedError;
use crate::config::Config;
use crate::session::{SecretText, Wipe};
use crate::types::{KeyInfo, OperationKind};

/// Inspect input: one armored key of either kind.
#[derive(Debug, Default)]
pub struct InspectFields {
    /// Armored public or private key
    pub key: SecretText,
}

impl Wipe for InspectFields {
    fn wipe(&mut self) {
        self.key.wipe();
    }
}

impl Operation for InspectFields {
    const KIND: OperationKind = OperationKind::Inspect;
    type Lease = ();
    type Output = ();

    fn set_field(&mut self, field: Field, value: &str) -> Result<(), ClassifiedError> {
        match field {
            Field::PublicKey | Field::PrivateKey => self.key.set(value),
            other => return Err(Self::unknown_field(other)),
        }
        Ok(())
    }

    fn key_texts(&self) -> Vec<Zeroizing<String>> {
        vec![self.key.lease()]
    }

    fn has_sensitive_data(&self) -> bool {
        !self.key.is_empty()
    }

    fn lease(&self, _config: &Config) -> Result<Self::Lease, ClassifiedError> {
        Ok(())
    }

    fn run(_backend: &dyn CryptoBackend, _lease: Self::Lease) -> crate::Result<Self::Output> {
        Ok(())
    }

    fn commit(&mut self, _output: Self::Output) {}
}

impl Engine<InspectFields> {
    /// Set the key text and inspect it.
    pub async fn inspect(&self, armored: &str) -> Result<KeyInfo, ClassifiedError> {
        self.set_field(Field::PublicKey, armored)?;
        let outcome: Outcome = self.submit().await;
        outcome?;
        self.key_info().ok_or_else(|| ClassifiedError::missing_key(OperationKind::Inspect))
    }
}
