//! # pgpworkbench
//!
//! Guided OpenPGP workflows (encrypt, decrypt, sign, verify and key
//! inspection) on top of [rpgp](https://docs.rs/pgp).
//!
//! The crate is the orchestration layer between a user interface and an
//! OpenPGP implementation:
//!
//! - **Key inspection**: turn armored key text into a [`KeyInfo`] with
//!   capabilities, expiration and protection state
//! - **Error classification**: every failure becomes a [`ClassifiedError`]
//!   tagged with the input it belongs to
//! - **Workflows**: a state machine per operation that decides whether a
//!   passphrase step is needed and runs the crypto call off the async
//!   executor
//! - **Secure session state**: keys, passphrases and plaintext are
//!   overwritten when a workflow is cleared or dropped
//!
//! The OpenPGP primitives themselves sit behind the [`CryptoBackend`]
//! trait; [`RpgpBackend`] is the production implementation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pgpworkbench::*;
//!
//! # async fn run() -> std::result::Result<(), ClassifiedError> {
//! let workflow = DecryptWorkflow::new(Arc::new(RpgpBackend::new()), Arc::new(Config::default()));
//!
//! workflow.set_field(Field::PrivateKey, &std::fs::read_to_string("secret.asc").unwrap())?;
//! workflow.set_field(Field::Message, &std::fs::read_to_string("message.asc").unwrap())?;
//!
//! if workflow.validate_key().await? == Progress::NeedsPassphrase {
//!     workflow.set_field(Field::Passphrase, "correct horse battery staple")?;
//! }
//! workflow.submit().await?;
//!
//! if let Some(plaintext) = workflow.output() {
//!     println!("{}", plaintext.as_str());
//! }
//! workflow.clear_all();
//! # Ok(())
//! # }
//! ```

// Modules
mod error;
mod types;
mod internal;

pub mod armor;
pub mod backend;
pub mod material;

mod classify;
mod config;
mod inspect;
mod session;
mod workflow;

// Re-export error types
pub use error::{Error, Result};

// Re-export all public types
pub use types::{
    Capabilities,
    Capability,
    ExpiryStatus,
    KeyInfo,
    KeyKind,
    OperationKind,
    SubkeyInfo,
    VerificationResult,
};

// Re-export the collaborator contract
pub use backend::{CryptoBackend, RpgpBackend, SignedInput};

// Re-export inspection and classification
pub use inspect::{derive_key_info, inspect};
pub use classify::{classify, ClassifiedError, ErrorKind, FieldTag};

// Re-export configuration and session state
pub use config::Config;
pub use session::{SecretText, SecureSession, Wipe};

// Re-export workflows
pub use workflow::{
    DecryptFields,
    DecryptWorkflow,
    EncryptFields,
    EncryptWorkflow,
    Engine,
    Field,
    InspectFields,
    InspectWorkflow,
    Operation,
    Outcome,
    Phase,
    Progress,
    SignFields,
    SignWorkflow,
    VerifyFields,
    VerifyWorkflow,
    Workflow,
    WorkflowState,
};
