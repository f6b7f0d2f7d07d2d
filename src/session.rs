//! Secure session state.
//!
//! Holders of secret text (key blocks, passphrases, plaintext, outputs)
//! overwrite their buffers when cleared instead of just dropping them.
//! [`SecureSession`] wraps a workflow's whole field set, wipes it on
//! request and again when it goes out of scope, and counts wipes so that
//! work started before a wipe can tell its result is no longer wanted.

use zeroize::{Zeroize, Zeroizing};

/// Overwrite secret contents in place.
pub trait Wipe {
    /// Overwrite every secret byte and reset to the empty state.
    fn wipe(&mut self);
}

impl Wipe for String {
    fn wipe(&mut self) {
        self.zeroize();
    }
}

impl Wipe for Vec<u8> {
    fn wipe(&mut self) {
        self.zeroize();
    }
}

impl<T: Wipe> Wipe for Option<T> {
    fn wipe(&mut self) {
        if let Some(value) = self.as_mut() {
            value.wipe();
        }
        *self = None;
    }
}

impl<T: Wipe> Wipe for Vec<T> {
    fn wipe(&mut self) {
        for value in self.iter_mut() {
            value.wipe();
        }
        self.clear();
    }
}

/// Text that is zeroized when replaced, wiped or dropped.
#[derive(Clone, Default)]
pub struct SecretText(Zeroizing<String>);

impl SecretText {
    /// Wrap `value`, taking ownership of its buffer.
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Replace the contents, overwriting the previous value first.
    pub fn set(&mut self, value: &str) {
        self.0.zeroize();
        self.0.push_str(value);
    }

    /// Borrow the text.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the text is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the text is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// A zeroizing copy to hand to a backend call. The copy is overwritten
    /// when it is dropped, on success and error paths alike.
    pub fn lease(&self) -> Zeroizing<String> {
        Zeroizing::new(self.0.as_str().to_owned())
    }
}

impl Wipe for SecretText {
    fn wipe(&mut self) {
        self.0.zeroize();
    }
}

impl From<&str> for SecretText {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl std::fmt::Debug for SecretText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Owner of a workflow's mutable fields.
///
/// Wipes its contents on [`SecureSession::wipe`] and on drop. Each wipe
/// advances the epoch; a task that captured an older epoch must discard
/// its result.
pub struct SecureSession<T: Wipe> {
    inner: T,
    epoch: u64,
}

impl<T: Wipe + Default> SecureSession<T> {
    /// Start a session with default (empty) fields.
    pub fn new() -> Self {
        Self {
            inner: T::default(),
            epoch: 0,
        }
    }
}

impl<T: Wipe + Default> Default for SecureSession<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Wipe> SecureSession<T> {
    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether `epoch` is still the current one.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Overwrite every field and start a new epoch.
    pub fn wipe(&mut self) {
        self.inner.wipe();
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl<T: Wipe> std::ops::Deref for SecureSession<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Wipe> std::ops::DerefMut for SecureSession<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Wipe> Drop for SecureSession<T> {
    fn drop(&mut self) {
        self.inner.wipe();
    }
}

impl<T: Wipe> std::fmt::Debug for SecureSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
