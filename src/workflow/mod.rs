//! Workflow engine.
//!
//! One [`Engine`] per operation drives the shared state machine
//!
//! ```text
//! Idle -> Validating -> (NeedsPassphrase | Ready) -> Running -> (Succeeded | Failed)
//! ```
//!
//! over that operation's field set. The field set lives in a
//! [`SecureSession`] and is wiped by [`Workflow::clear_all`] and when the
//! engine is dropped. Crypto calls run on tokio's blocking pool against
//! zeroizing copies of the fields; a result that arrives after the session
//! was wiped is discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::backend::CryptoBackend;
use crate::classify::{classify, ClassifiedError, ErrorKind, FieldTag};
use crate::config::Config;
use crate::error::Error;
use crate::inspect::inspect_for;
use crate::session::{SecretText, SecureSession, Wipe};
use crate::types::{KeyInfo, OperationKind};

mod decrypt;
mod encrypt;
mod inspect;
mod sign;
mod verify;

pub use decrypt::DecryptFields;
pub use encrypt::EncryptFields;
pub use inspect::InspectFields;
pub use sign::SignFields;
pub use verify::VerifyFields;

/// Encrypt to one or more recipients.
pub type EncryptWorkflow = Engine<EncryptFields>;
/// Decrypt with a private key.
pub type DecryptWorkflow = Engine<DecryptFields>;
/// Cleartext or detached signing.
pub type SignWorkflow = Engine<SignFields>;
/// Verify cleartext, inline or detached signatures.
pub type VerifyWorkflow = Engine<VerifyFields>;
/// Stand-alone key inspection.
pub type InspectWorkflow = Engine<InspectFields>;

/// Where a workflow is in its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Nothing validated yet
    #[default]
    Idle,
    /// Key inspection in progress
    Validating,
    /// Key is protected; a passphrase is required before submitting
    NeedsPassphrase,
    /// Ready to submit
    Ready,
    /// Crypto call in progress
    Running,
    /// Last attempt produced a result
    Succeeded,
    /// Last attempt failed; see [`Workflow::last_error`]
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Validating => "validating",
            Phase::NeedsPassphrase => "needs-passphrase",
            Phase::Ready => "ready",
            Phase::Running => "running",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Successful outcome of [`Workflow::validate_key`] or [`Workflow::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Key validated, no passphrase needed
    Ready,
    /// Key validated and passphrase-protected
    NeedsPassphrase,
    /// The operation ran and its result is stored
    Completed,
    /// Another call is in flight; nothing was started
    Busy,
    /// The session was cleared while the call ran; the result was dropped
    Discarded,
}

/// Result of a workflow step.
pub type Outcome = std::result::Result<Progress, ClassifiedError>;

/// An input a workflow accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// Armored private key
    PrivateKey,
    /// Armored public key
    PublicKey,
    /// Passphrase for the private key
    Passphrase,
    /// Plaintext, ciphertext, signed message or signed data
    Message,
    /// Detached signature
    Signature,
}

impl Field {
    /// The error tag for this input.
    pub fn tag(self) -> FieldTag {
        match self {
            Field::PrivateKey => FieldTag::PrivateKey,
            Field::PublicKey => FieldTag::PublicKey,
            Field::Passphrase => FieldTag::Passphrase,
            Field::Message | Field::Signature => FieldTag::Message,
        }
    }

    fn is_key(self) -> bool {
        matches!(self, Field::PrivateKey | Field::PublicKey)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::PrivateKey => "private key",
            Field::PublicKey => "public key",
            Field::Passphrase => "passphrase",
            Field::Message => "message",
            Field::Signature => "signature",
        };
        f.write_str(name)
    }
}

/// The per-operation half of a workflow: its fields and its crypto call.
pub trait Operation: Wipe + Default + Send + 'static {
    /// Which operation this is
    const KIND: OperationKind;

    /// Zeroizing copies of the fields the crypto call needs
    type Lease: Send + 'static;

    /// What the crypto call produces
    type Output: Send + 'static;

    /// Store `value` in `field`. Unknown fields are rejected.
    fn set_field(&mut self, field: Field, value: &str) -> Result<(), ClassifiedError>;

    /// Key texts to inspect, in order.
    fn key_texts(&self) -> Vec<Zeroizing<String>>;

    /// The passphrase field, for operations that unlock a private key.
    fn passphrase(&self) -> Option<&SecretText> {
        None
    }

    /// Whether any field currently holds text.
    fn has_sensitive_data(&self) -> bool;

    /// Reject a successfully inspected key this operation cannot use.
    fn check_key(_info: &KeyInfo) -> crate::Result<()> {
        Ok(())
    }

    /// Copy the inputs out for the crypto call, validating them first.
    fn lease(&self, config: &Config) -> Result<Self::Lease, ClassifiedError>;

    /// The crypto call. Runs on the blocking pool.
    fn run(backend: &dyn CryptoBackend, lease: Self::Lease) -> crate::Result<Self::Output>;

    /// Store the result.
    fn commit(&mut self, output: Self::Output);

    /// Reject a field this operation does not have.
    fn unknown_field(field: Field) -> ClassifiedError {
        ClassifiedError::new(
            ErrorKind::OperationFailed,
            FieldTag::None,
            format!("The {} workflow has no {field} input", Self::KIND),
        )
    }
}

/// A workflow's complete state.
#[derive(Debug, Default)]
pub struct WorkflowState<O> {
    /// The operation's inputs and output
    pub fields: O,
    /// State machine position
    pub phase: Phase,
    /// Whether a validation or crypto call is in flight
    pub busy: bool,
    /// Inspected keys, one per key text
    pub keys: Vec<KeyInfo>,
    /// The single active error
    pub last_error: Option<ClassifiedError>,
    key_revision: u64,
}

impl<O: Wipe> Wipe for WorkflowState<O> {
    fn wipe(&mut self) {
        self.fields.wipe();
        self.keys.clear();
        self.last_error = None;
        self.phase = Phase::Idle;
        self.busy = false;
        self.key_revision = self.key_revision.wrapping_add(1);
    }
}

/// Caller-facing surface shared by every workflow.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// The operation this workflow performs.
    fn operation(&self) -> OperationKind;

    /// Store an input. Setting a key clears the inspected key and the
    /// active error without inspecting the new text.
    fn set_field(&self, field: Field, value: &str) -> Result<(), ClassifiedError>;

    /// Inspect the key input(s).
    async fn validate_key(&self) -> Outcome;

    /// Run the operation, validating the key first if needed.
    async fn submit(&self) -> Outcome;

    /// Wipe every field and return to [`Phase::Idle`].
    fn clear_all(&self);

    /// Current phase.
    fn phase(&self) -> Phase;

    /// Whether a call is in flight.
    fn is_busy(&self) -> bool;

    /// The active error, if any.
    fn last_error(&self) -> Option<ClassifiedError>;

    /// The first inspected key, if any.
    fn key_info(&self) -> Option<KeyInfo>;

    /// Whether a passphrase step is needed before submitting.
    fn needs_passphrase(&self) -> bool;

    /// Whether any input or output still holds text.
    fn has_sensitive_data(&self) -> bool;
}

/// Shared state machine for one operation.
pub struct Engine<O: Operation> {
    state: Mutex<SecureSession<WorkflowState<O>>>,
    backend: Arc<dyn CryptoBackend>,
    config: Arc<Config>,
}

impl<O: Operation> Engine<O> {
    /// Create a workflow in [`Phase::Idle`].
    pub fn new(backend: Arc<dyn CryptoBackend>, config: Arc<Config>) -> Self {
        Self {
            state: Mutex::new(SecureSession::new()),
            backend,
            config,
        }
    }

    /// Read the state without copying secrets out of it.
    pub fn with_state<R>(&self, f: impl FnOnce(&WorkflowState<O>) -> R) -> R {
        let session = self.lock();
        f(&session)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SecureSession<WorkflowState<O>>> {
        // A panic while holding the lock must not stop the wipe.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a mutation to the fields, treating it as a key change.
    pub(crate) fn update_keys(
        &self,
        f: impl FnOnce(&mut O) -> Result<(), ClassifiedError>,
    ) -> Result<(), ClassifiedError> {
        let mut session = self.lock();
        f(&mut session.fields)?;
        Self::key_changed(&mut session);
        Ok(())
    }

    pub(crate) fn key_changed(state: &mut WorkflowState<O>) {
        state.keys.clear();
        state.last_error = None;
        state.key_revision = state.key_revision.wrapping_add(1);
        if !state.busy {
            state.phase = Phase::Idle;
        }
    }

    fn needs_passphrase_in(state: &WorkflowState<O>) -> bool {
        state.fields.passphrase().is_some() && state.keys.iter().any(KeyInfo::needs_passphrase)
    }

    fn fail(state: &mut WorkflowState<O>, error: ClassifiedError) -> Outcome {
        tracing::warn!(
            operation = %O::KIND,
            kind = ?error.kind,
            field = ?error.field,
            "workflow step failed"
        );
        state.phase = Phase::Failed;
        state.last_error = Some(error.clone());
        Err(error)
    }

    async fn validate(&self) -> Outcome {
        let (texts, epoch, revision, restore) = {
            let mut session = self.lock();
            if session.busy {
                return Ok(Progress::Busy);
            }
            session.last_error = None;
            let texts = session.fields.key_texts();
            if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
                session.keys.clear();
                return Self::fail(&mut session, ClassifiedError::missing_key(O::KIND));
            }
            let restore = session.phase;
            session.phase = Phase::Validating;
            session.busy = true;
            (texts, session.epoch(), session.key_revision, restore)
        };
        tracing::debug!(operation = %O::KIND, keys = texts.len(), "validating key input");

        let guard = BusyGuard::new(self, epoch, restore);
        let backend = Arc::clone(&self.backend);
        let config = Arc::clone(&self.config);
        let joined = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| -> Result<KeyInfo, ClassifiedError> {
                    let info = inspect_for(backend.as_ref(), text, O::KIND, &config)?;
                    O::check_key(&info).map_err(|e| classify(&e, O::KIND))?;
                    Ok(info)
                })
                .collect::<Result<Vec<KeyInfo>, ClassifiedError>>()
        })
        .await;
        guard.disarm();

        let mut session = self.lock();
        if !session.is_current(epoch) {
            return Ok(Progress::Discarded);
        }
        session.busy = false;
        if session.key_revision != revision {
            // The key text changed while it was being inspected.
            session.phase = Phase::Idle;
            return Ok(Progress::Discarded);
        }

        let result = joined.unwrap_or_else(|e| Err(classify(&Error::from(e), O::KIND)));
        match result {
            Ok(infos) => {
                session.keys = infos;
                let progress = if Self::needs_passphrase_in(&session) {
                    session.phase = Phase::NeedsPassphrase;
                    Progress::NeedsPassphrase
                } else {
                    session.phase = Phase::Ready;
                    Progress::Ready
                };
                tracing::debug!(operation = %O::KIND, phase = %session.phase, "key validated");
                Ok(progress)
            }
            Err(error) => {
                session.keys.clear();
                Self::fail(&mut session, error)
            }
        }
    }

    async fn run_submit(&self) -> Outcome {
        let epoch = {
            let mut session = self.lock();
            if session.busy {
                return Ok(Progress::Busy);
            }
            session.last_error = None;
            session.epoch()
        };

        let revalidate = self.with_state(|state| {
            state.keys.is_empty()
                || !matches!(state.phase, Phase::Ready | Phase::NeedsPassphrase)
        });
        if revalidate {
            match self.validate().await? {
                Progress::Ready | Progress::NeedsPassphrase => {}
                other => return Ok(other),
            }
        }

        let (lease, revision, restore) = {
            let mut session = self.lock();
            if !session.is_current(epoch) {
                return Ok(Progress::Discarded);
            }
            if session.busy {
                return Ok(Progress::Busy);
            }
            match session.phase {
                Phase::Ready => {}
                Phase::NeedsPassphrase => {
                    let supplied = session
                        .fields
                        .passphrase()
                        .is_some_and(|p| !p.is_empty());
                    if !supplied {
                        return Self::fail(&mut session, ClassifiedError::passphrase_required());
                    }
                }
                _ => return Ok(Progress::Discarded),
            }
            let lease = match session.fields.lease(&self.config) {
                Ok(lease) => lease,
                Err(error) => return Self::fail(&mut session, error),
            };
            let restore = session.phase;
            session.phase = Phase::Running;
            session.busy = true;
            (lease, session.key_revision, restore)
        };
        tracing::info!(operation = %O::KIND, "running crypto operation");

        let guard = BusyGuard::new(self, epoch, restore);
        let backend = Arc::clone(&self.backend);
        let joined = tokio::task::spawn_blocking(move || O::run(backend.as_ref(), lease)).await;
        guard.disarm();

        let mut session = self.lock();
        if !session.is_current(epoch) {
            tracing::debug!(operation = %O::KIND, "session cleared, result dropped");
            return Ok(Progress::Discarded);
        }
        session.busy = false;
        if session.key_revision != revision {
            // The result belongs to a key that has since been replaced.
            tracing::debug!(operation = %O::KIND, "key changed, result dropped");
            session.phase = Phase::Idle;
            return Ok(Progress::Discarded);
        }

        match joined.map_err(Error::from).and_then(|result| result) {
            Ok(output) => {
                session.fields.commit(output);
                session.phase = Phase::Succeeded;
                tracing::info!(operation = %O::KIND, "operation succeeded");
                Ok(Progress::Completed)
            }
            Err(raw) => Self::fail(&mut session, classify(&raw, O::KIND)),
        }
    }
}

#[async_trait]
impl<O: Operation> Workflow for Engine<O> {
    fn operation(&self) -> OperationKind {
        O::KIND
    }

    fn set_field(&self, field: Field, value: &str) -> Result<(), ClassifiedError> {
        let mut session = self.lock();
        if let Err(raw) = self.config.check_size(value) {
            let kind = match field {
                Field::PrivateKey | Field::PublicKey => ErrorKind::InvalidKeyFormat,
                Field::Message | Field::Signature => ErrorKind::InvalidMessageFormat,
                Field::Passphrase => ErrorKind::OperationFailed,
            };
            let error = ClassifiedError::new(kind, field.tag(), raw.to_string());
            session.last_error = Some(error.clone());
            return Err(error);
        }
        session.fields.set_field(field, value)?;
        if field.is_key() {
            Self::key_changed(&mut session);
        }
        Ok(())
    }

    async fn validate_key(&self) -> Outcome {
        self.validate().await
    }

    async fn submit(&self) -> Outcome {
        self.run_submit().await
    }

    fn clear_all(&self) {
        self.lock().wipe();
        tracing::debug!(operation = %O::KIND, "workflow cleared");
    }

    fn phase(&self) -> Phase {
        self.lock().phase
    }

    fn is_busy(&self) -> bool {
        self.lock().busy
    }

    fn last_error(&self) -> Option<ClassifiedError> {
        self.lock().last_error.clone()
    }

    fn key_info(&self) -> Option<KeyInfo> {
        self.lock().keys.first().cloned()
    }

    fn needs_passphrase(&self) -> bool {
        Self::needs_passphrase_in(&self.lock())
    }

    fn has_sensitive_data(&self) -> bool {
        self.lock().fields.has_sensitive_data()
    }
}

impl<O: Operation> std::fmt::Debug for Engine<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("operation", &O::KIND)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Releases the busy flag if the owning future is dropped mid-call.
struct BusyGuard<'a, O: Operation> {
    engine: &'a Engine<O>,
    epoch: u64,
    restore: Phase,
    armed: bool,
}

impl<'a, O: Operation> BusyGuard<'a, O> {
    fn new(engine: &'a Engine<O>, epoch: u64, restore: Phase) -> Self {
        Self {
            engine,
            epoch,
            restore,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<O: Operation> Drop for BusyGuard<'_, O> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.engine.lock();
        if session.is_current(self.epoch) {
            session.busy = false;
            session.phase = self.restore;
            tracing::debug!(operation = %O::KIND, "call abandoned, state restored");
        }
    }
}

/// Lease a text field, or `None` when it is blank.
pub(crate) fn lease_optional(text: &SecretText) -> Option<Zeroizing<String>> {
    (!text.is_empty()).then(|| text.lease())
}

/// Lease a required text field.
pub(crate) fn lease_required(
    text: &SecretText,
    missing: impl FnOnce() -> ClassifiedError,
) -> Result<Zeroizing<String>, ClassifiedError> {
    if text.is_blank() {
        return Err(missing());
    }
    Ok(text.lease())
}
