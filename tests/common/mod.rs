//! Shared helpers for the workflow tests: a scripted crypto backend and
//! armor builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};

use chrono::{TimeZone, Utc};
use tokio::sync::Notify;
use zeroize::Zeroizing;

use pgp::armor::BlockType;
use pgpworkbench::armor::BlockKind;
use pgpworkbench::material::{
    KeyComponent, KeyMaterial, SignatureKind, SignatureRecord, SubkeyMaterial, UserMaterial,
};
use pgpworkbench::{
    Capabilities, CryptoBackend, Error, Result, SignedInput, VerificationResult,
};

pub const FIXTURE_FPR: &str = "0123456789abcdef0123456789abcdef01234567";
pub const FIXTURE_UID: &str = "Fake Signer <fake@example.com>";
pub const PLAINTEXT: &str = "attack at dawn\n";

struct Packets<'a>(&'a [u8]);

impl pgp::ser::Serialize for Packets<'_> {
    fn to_writer<W: std::io::Write>(&self, writer: &mut W) -> pgp::errors::Result<()> {
        writer.write_all(self.0)?;
        Ok(())
    }

    fn write_len(&self) -> usize {
        self.0.len()
    }
}

/// Armor `body` with rpgp's writer, including the CRC-24 line.
pub fn armor(kind: BlockKind, body: &[u8]) -> String {
    let typ = match kind {
        BlockKind::PublicKey => BlockType::PublicKey,
        BlockKind::PrivateKey => BlockType::PrivateKey,
        BlockKind::Message => BlockType::Message,
        BlockKind::SignedMessage => BlockType::CleartextMessage,
        BlockKind::Signature => BlockType::Signature,
    };
    let mut out = Vec::new();
    pgp::armor::write(&Packets(body), typ, &mut out, None, true).unwrap();
    String::from_utf8(out).unwrap()
}

pub fn public_key_block() -> String {
    armor(BlockKind::PublicKey, b"fake public key packets")
}

pub fn private_key_block() -> String {
    armor(BlockKind::PrivateKey, b"fake secret key packets")
}

pub fn message_block() -> String {
    armor(BlockKind::Message, b"fake encrypted packets")
}

pub fn signature_block() -> String {
    armor(BlockKind::Signature, b"fake signature packets")
}

pub fn cleartext_block(text: &str) -> String {
    format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n{text}\n{}",
        signature_block()
    )
}

fn record(kind: SignatureKind, flags: u8) -> SignatureRecord {
    SignatureRecord {
        kind,
        created: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
        key_flags: Some(Capabilities::from_bitmask(flags)),
        key_validity_secs: None,
        valid: true,
    }
}

fn component(fpr_hex: &str, algorithm: &str, curve: &str) -> KeyComponent {
    let fingerprint = hex::decode(fpr_hex).unwrap();
    KeyComponent {
        key_id: fingerprint[fingerprint.len() - 8..].to_vec(),
        fingerprint,
        algorithm: algorithm.to_string(),
        curve: Some(curve.to_string()),
        bit_size: None,
        created: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    }
}

/// An EdDSA primary (certify + sign) with one ECDH encryption subkey.
pub fn key_material(is_secret: bool, secret_encrypted: bool) -> KeyMaterial {
    KeyMaterial {
        is_secret,
        secret_encrypted: is_secret && secret_encrypted,
        primary: component(FIXTURE_FPR, "EdDSA", "ed25519"),
        direct_signatures: vec![],
        users: vec![UserMaterial {
            id: FIXTURE_UID.to_string(),
            signatures: vec![record(SignatureKind::Certification, 3)],
        }],
        subkeys: vec![SubkeyMaterial {
            component: component("fedcba9876543210fedcba9876543210fedcba98", "ECDH", "cv25519"),
            signatures: vec![record(SignatureKind::SubkeyBinding, 4)],
        }],
    }
}

/// Holds a backend call until the test releases it.
pub struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release_tx: Mutex<mpsc::Sender<()>>,
    release_rx: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release_tx: Mutex::new(tx),
            release_rx: Mutex::new(rx),
        }
    }

    /// Wait until a gated call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call finish.
    pub fn release(&self) {
        self.release_tx.lock().unwrap().send(()).unwrap();
    }

    fn pass(&self) {
        // Only the first call is held.
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            let _ = self.release_rx.lock().unwrap().recv();
        }
    }
}

/// Scripted backend. Keys are recognised by their armor label; the secret
/// key is unlocked by `passphrase` when one is set.
pub struct FakeBackend {
    pub passphrase: Option<String>,
    pub verify_result: VerificationResult,
    pub plaintext: Vec<u8>,
    pub gate: Option<std::sync::Arc<Gate>>,
    pub parse_calls: AtomicUsize,
    pub encrypt_calls: AtomicUsize,
    pub decrypt_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub last_verify: Mutex<Option<&'static str>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            passphrase: None,
            verify_result: VerificationResult {
                valid: true,
                signed_by: Some(FIXTURE_UID.to_string()),
                ..VerificationResult::default()
            },
            plaintext: PLAINTEXT.as_bytes().to_vec(),
            gate: None,
            parse_calls: AtomicUsize::new(0),
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            last_verify: Mutex::new(None),
        }
    }

    pub fn protected(passphrase: &str) -> Self {
        Self {
            passphrase: Some(passphrase.to_string()),
            ..Self::new()
        }
    }

    pub fn gated(mut self, gate: std::sync::Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn decrypting_to(mut self, plaintext: &[u8]) -> Self {
        self.plaintext = plaintext.to_vec();
        self
    }

    pub fn verifying(mut self, result: VerificationResult) -> Self {
        self.verify_result = result;
        self
    }

    fn unlock(&self, private_key: &str, passphrase: Option<&str>) -> Result<()> {
        if !private_key.contains("PRIVATE KEY BLOCK") {
            return Err(Error::NoSecretKey);
        }
        match (&self.passphrase, passphrase) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(Error::PassphraseRequired),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (Some(_), Some(_)) => Err(Error::InvalidPassword),
        }
    }
}

impl CryptoBackend for FakeBackend {
    fn parse_key(&self, armored: &str) -> Result<KeyMaterial> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        if armored.contains("PRIVATE KEY BLOCK") {
            Ok(key_material(true, self.passphrase.is_some()))
        } else if armored.contains("PUBLIC KEY BLOCK") {
            Ok(key_material(false, false))
        } else {
            Err(Error::Parse("not a key".to_string()))
        }
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &[&str]) -> Result<String> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if recipients.is_empty() {
            return Err(Error::InvalidInput("no recipients".to_string()));
        }
        Ok(armor(BlockKind::Message, plaintext))
    }

    fn decrypt(
        &self,
        _ciphertext: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.unlock(private_key, passphrase)?;
        Ok(Zeroizing::new(self.plaintext.clone()))
    }

    fn sign(
        &self,
        message: &[u8],
        private_key: &str,
        passphrase: Option<&str>,
        detached: bool,
    ) -> Result<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.unlock(private_key, passphrase)?;
        if detached {
            Ok(signature_block())
        } else {
            Ok(cleartext_block(&String::from_utf8_lossy(message)))
        }
    }

    fn verify(&self, input: SignedInput<'_>, _public_key: &str) -> Result<VerificationResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let style = match input {
            SignedInput::Cleartext(_) => "cleartext",
            SignedInput::Inline(_) => "inline",
            SignedInput::Detached { .. } => "detached",
        };
        *self.last_verify.lock().unwrap() = Some(style);
        Ok(self.verify_result.clone())
    }
}
