//! The crypto collaborator contract.
//!
//! Workflows never touch OpenPGP packets themselves; they go through a
//! [`CryptoBackend`]. [`RpgpBackend`] is the production implementation.
//! Tests substitute scripted backends.

use zeroize::Zeroizing;

use crate::error::Result;
use crate::material::KeyMaterial;
use crate::types::VerificationResult;

mod rpgp;

pub use rpgp::RpgpBackend;

/// A signed input handed to [`CryptoBackend::verify`].
#[derive(Debug, Clone, Copy)]
pub enum SignedInput<'a> {
    /// Cleartext signature framework (`BEGIN PGP SIGNED MESSAGE`)
    Cleartext(&'a str),
    /// Inline-signed OpenPGP message (`BEGIN PGP MESSAGE`)
    Inline(&'a str),
    /// Detached signature over separately supplied data
    Detached {
        /// The signed data
        data: &'a [u8],
        /// Armored `BEGIN PGP SIGNATURE` block
        signature: &'a str,
    },
}

/// OpenPGP primitives the workflows depend on.
///
/// All inputs and outputs are ASCII-armored text. Implementations report
/// failures through the structured [`Error`](crate::Error) categories so
/// that [`classify`](crate::classify) can route them without inspecting
/// message strings. Calls are CPU-bound and synchronous; the workflows run
/// them on tokio's blocking pool.
pub trait CryptoBackend: Send + Sync {
    /// Parse an armored public or private key block.
    fn parse_key(&self, armored: &str) -> Result<KeyMaterial>;

    /// Encrypt `plaintext` to every recipient and return a `PGP MESSAGE`.
    fn encrypt(&self, plaintext: &[u8], recipients: &[&str]) -> Result<String>;

    /// Decrypt an armored message with a private key.
    ///
    /// `passphrase` is `None` when the caller has none; a protected key
    /// must then fail with [`Error::PassphraseRequired`](crate::Error::PassphraseRequired).
    fn decrypt(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Sign `message`. With `detached` the result is a `PGP SIGNATURE`
    /// block, otherwise a cleartext-signed `PGP SIGNED MESSAGE`.
    fn sign(
        &self,
        message: &[u8],
        private_key: &str,
        passphrase: Option<&str>,
        detached: bool,
    ) -> Result<String>;

    /// Verify a signed input against a public key.
    ///
    /// A signature that does not check out is `Ok` with `valid == false`;
    /// only unparseable input is an error.
    fn verify(&self, input: SignedInput<'_>, public_key: &str) -> Result<VerificationResult>;
}
