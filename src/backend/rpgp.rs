//! [`CryptoBackend`] on top of [rpgp](https://docs.rs/pgp).

use std::io::Cursor;

use pgp::composed::{
    CleartextSignedMessage, Deserializable, DetachedSignature, Message, MessageBuilder,
    SignedPublicKey, SignedSecretKey,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{SecretKey, SecretSubkey};
use pgp::types::{EcdsaPublicParams, Password, PublicKeyTrait, PublicParams};
use rand::thread_rng;
use zeroize::Zeroizing;

use super::{CryptoBackend, SignedInput};
use crate::armor::{self, BlockKind};
use crate::error::{Error, Result};
use crate::internal::{
    encryption_subkeys, is_secret_encrypted, key_material, normalize_line_endings,
    parse_public_key, parse_secret_key, primary_user_id, signed_at,
};
use crate::material::KeyMaterial;
use crate::types::VerificationResult;

const MISMATCH: &str = "Signature does not match the message and key";

/// The production crypto backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpgpBackend;

impl RpgpBackend {
    /// Create a backend.
    pub fn new() -> Self {
        Self
    }
}

/// Select appropriate hash algorithm based on key type.
/// ECDSA keys require hash algorithms that match or exceed their security level.
fn select_hash_for_key(secret_key: &SignedSecretKey) -> HashAlgorithm {
    match secret_key.primary_key.public_key().public_params() {
        PublicParams::ECDSA(ecdsa) => match ecdsa {
            EcdsaPublicParams::P384 { .. } => HashAlgorithm::Sha384,
            EcdsaPublicParams::P521 { .. } => HashAlgorithm::Sha512,
            _ => HashAlgorithm::Sha256,
        },
        _ => HashAlgorithm::Sha256,
    }
}

/// What the secret key is unlocked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Sign,
    Decrypt,
}

/// A secret component an operation may use.
enum Component<'a> {
    Primary(&'a SecretKey),
    Subkey(&'a SecretSubkey),
}

impl Component<'_> {
    fn is_protected(&self) -> bool {
        match self {
            Component::Primary(key) => key.secret_params().is_encrypted(),
            Component::Subkey(key) => key.secret_params().is_encrypted(),
        }
    }

    fn accepts(&self, password: &Password) -> bool {
        let unlocked = match self {
            Component::Primary(key) => key.unlock(password, |_, _| Ok(())),
            Component::Subkey(key) => key.unlock(password, |_, _| Ok(())),
        };
        matches!(unlocked, Ok(Ok(())))
    }
}

/// Components used for `usage`: the primary signs, encryption-capable
/// keys decrypt.
fn components(secret_key: &SignedSecretKey, usage: Usage) -> Vec<Component<'_>> {
    let primary = &secret_key.primary_key;
    match usage {
        Usage::Sign => vec![Component::Primary(primary)],
        Usage::Decrypt => {
            let mut used: Vec<Component<'_>> = secret_key
                .secret_subkeys
                .iter()
                .filter(|subkey| subkey.key.public_key().is_encryption_key())
                .map(|subkey| Component::Subkey(&subkey.key))
                .collect();
            if primary.public_key().is_encryption_key() {
                used.push(Component::Primary(primary));
            }
            used
        }
    }
}

/// Turn the caller's passphrase into an rpgp [`Password`], checking it
/// against the components `usage` needs so that a wrong passphrase is
/// reported as such rather than as a generic operation failure.
fn unlock(
    secret_key: &SignedSecretKey,
    passphrase: Option<&str>,
    usage: Usage,
) -> Result<Password> {
    let protected: Vec<Component<'_>> = components(secret_key, usage)
        .into_iter()
        .filter(Component::is_protected)
        .collect();
    if protected.is_empty() {
        return Ok(Password::empty());
    }
    let passphrase = match passphrase {
        Some(p) if !p.is_empty() => p,
        _ => return Err(Error::PassphraseRequired),
    };
    let password: Password = passphrase.into();

    if !protected.iter().any(|component| component.accepts(&password)) {
        tracing::debug!(?usage, components = protected.len(), "passphrase rejected");
        return Err(Error::InvalidPassword);
    }
    Ok(password)
}

fn read_message(armored: &str) -> Result<Message<'_>> {
    let (message, _headers) = Message::from_armor(Cursor::new(armored.as_bytes()))
        .map_err(|e| Error::MalformedMessage(e.to_string()))?;
    Ok(message)
}

fn verify_cleartext(public_key: &SignedPublicKey, text: &str) -> Result<VerificationResult> {
    let (msg, _headers) = CleartextSignedMessage::from_string(text)
        .map_err(|e| Error::MalformedMessage(e.to_string()))?;
    let message = Some(normalize_line_endings(&msg.signed_text()));

    let verified = msg
        .verify(&public_key.primary_key)
        .ok()
        .map(signed_at)
        .or_else(|| {
            public_key
                .public_subkeys
                .iter()
                .find_map(|subkey| msg.verify(&subkey.key).ok().map(signed_at))
        });

    Ok(match verified {
        Some(signed_at) => VerificationResult {
            valid: true,
            signed_by: primary_user_id(public_key),
            signed_at,
            message,
            error: None,
        },
        None => VerificationResult {
            message,
            ..VerificationResult::invalid(MISMATCH)
        },
    })
}

fn verify_detached(
    public_key: &SignedPublicKey,
    data: &[u8],
    signature: &str,
) -> Result<VerificationResult> {
    let (sig, _headers) = DetachedSignature::from_armor_single(Cursor::new(signature.as_bytes()))
        .map_err(|e| Error::MalformedMessage(e.to_string()))?;

    let valid = sig.verify(&public_key.primary_key, data).is_ok()
        || public_key
            .public_subkeys
            .iter()
            .any(|subkey| sig.verify(&subkey.key, data).is_ok());

    if !valid {
        return Ok(VerificationResult::invalid(MISMATCH));
    }
    Ok(VerificationResult {
        valid: true,
        signed_by: primary_user_id(public_key),
        signed_at: signed_at(&sig.signature),
        message: None,
        error: None,
    })
}

/// Drop spaces and tabs at line ends. Cleartext verifiers hash the text
/// without them, so the signature has to cover the same bytes.
fn strip_trailing_blanks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        out.push_str(content.trim_end_matches([' ', '\t']));
        out.push_str(&line[content.len()..]);
    }
    out
}

fn verify_inline(public_key: &SignedPublicKey, armored: &str) -> Result<VerificationResult> {
    let mut message = read_message(armored)?;
    if message.is_compressed() {
        message = message
            .decompress()
            .map_err(|e| Error::MalformedMessage(e.to_string()))?;
    }

    // The content must be read before the signature can be checked.
    let content = message
        .as_data_vec()
        .map_err(|e| Error::MalformedMessage(e.to_string()))?;
    // Binary payloads are verified but not returned as text.
    let text = String::from_utf8(content)
        .ok()
        .map(|text| normalize_line_endings(&text));

    let verified = message
        .verify(&public_key.primary_key)
        .ok()
        .map(signed_at)
        .or_else(|| {
            public_key
                .public_subkeys
                .iter()
                .find_map(|subkey| message.verify(&subkey.key).ok().map(signed_at))
        });

    Ok(match verified {
        Some(signed_at) => VerificationResult {
            valid: true,
            signed_by: primary_user_id(public_key),
            signed_at,
            message: text,
            error: None,
        },
        None => VerificationResult {
            message: text,
            ..VerificationResult::invalid(MISMATCH)
        },
    })
}

impl CryptoBackend for RpgpBackend {
    fn parse_key(&self, armored: &str) -> Result<KeyMaterial> {
        let kind = armor::peek_kind(armored).map_err(Error::KeyArmor)?;
        match kind {
            BlockKind::PrivateKey => {
                let secret_key = parse_secret_key(armored)?;
                let encrypted = is_secret_encrypted(&secret_key);
                Ok(key_material(&secret_key.signed_public_key(), true, encrypted))
            }
            BlockKind::PublicKey => {
                let public_key = parse_public_key(armored)?;
                Ok(key_material(&public_key, false, false))
            }
            other => Err(Error::Parse(format!("expected a key block, found {other}"))),
        }
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &[&str]) -> Result<String> {
        if recipients.is_empty() {
            return Err(Error::InvalidInput("No recipients specified".to_string()));
        }

        let mut encryption_keys = Vec::new();
        for armored in recipients {
            let public_key = parse_public_key(armored)?;
            encryption_keys.extend(encryption_subkeys(&public_key)?);
        }

        let mut rng = thread_rng();
        let mut builder = MessageBuilder::from_bytes("", plaintext.to_vec())
            .seipd_v1(&mut rng, SymmetricKeyAlgorithm::AES256);
        for key in &encryption_keys {
            builder
                .encrypt_to_key(&mut rng, key)
                .map_err(|e| Error::Crypto(e.to_string()))?;
        }

        let armored = builder
            .to_armored_string(&mut rng, None.into())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        tracing::debug!(
            recipients = recipients.len(),
            subkeys = encryption_keys.len(),
            "encrypted message"
        );
        Ok(armored)
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let secret_key = parse_secret_key(private_key)?;
        let password = unlock(&secret_key, passphrase, Usage::Decrypt)?;
        let message = read_message(ciphertext)?;

        // Messages without integrity protection need the legacy path.
        let decrypted = message.decrypt(&password, &secret_key).or_else(|_| {
            read_message(ciphertext)?
                .decrypt_legacy(&password, &secret_key)
                .map_err(|e| Error::Crypto(e.to_string()))
        })?;

        let mut decompressed = if decrypted.is_compressed() {
            decrypted
                .decompress()
                .map_err(|e| Error::Crypto(e.to_string()))?
        } else {
            decrypted
        };

        let plaintext = decompressed
            .as_data_vec()
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn sign(
        &self,
        message: &[u8],
        private_key: &str,
        passphrase: Option<&str>,
        detached: bool,
    ) -> Result<String> {
        let secret_key = parse_secret_key(private_key)?;
        let password = unlock(&secret_key, passphrase, Usage::Sign)?;
        let mut rng = thread_rng();

        if detached {
            let signature = DetachedSignature::sign_binary_data(
                &mut rng,
                &secret_key.primary_key,
                &password,
                select_hash_for_key(&secret_key),
                Cursor::new(message),
            )
            .map_err(|e| Error::Crypto(e.to_string()))?;
            return signature
                .to_armored_string(None.into())
                .map_err(|e| Error::Crypto(e.to_string()));
        }

        let text = std::str::from_utf8(message).map_err(|_| {
            Error::InvalidInput("cleartext signatures need UTF-8 text".to_string())
        })?;
        let text = strip_trailing_blanks(text);
        let csf = CleartextSignedMessage::sign(&mut rng, &text, &secret_key.primary_key, &password)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        csf.to_armored_string(None.into())
            .map_err(|e| Error::Crypto(e.to_string()))
    }

    fn verify(&self, input: SignedInput<'_>, public_key: &str) -> Result<VerificationResult> {
        let public_key = parse_public_key(public_key)?;
        match input {
            SignedInput::Cleartext(text) => verify_cleartext(&public_key, text),
            SignedInput::Inline(armored) => verify_inline(&public_key, armored),
            SignedInput::Detached { data, signature } => {
                verify_detached(&public_key, data, signature)
            }
        }
    }
}
