use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// Settings surface of the request-signing validator.
///
/// Holds the shared signing key and the enabled flag. Both can be changed
/// at runtime through `&self`, so a single instance is shared behind an
/// `Arc` by the validator and the initialization gate.
#[derive(Default)]
pub struct SignValidator {
    sign_key: RwLock<String>,
    enabled: AtomicBool,
}

impl SignValidator {
    pub fn new(sign_key: impl Into<String>, enabled: bool) -> Self {
        Self {
            sign_key: RwLock::new(sign_key.into()),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_sign_key(&self, sign_key: &str) {
        let mut guard = self
            .sign_key
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sign_key.clone_into(&mut *guard);
    }

    pub fn sign_key(&self) -> String {
        self.sign_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_sign_key(&self) -> bool {
        !self
            .sign_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SignValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignValidator")
            .field("sign_key", &"[REDACTED]")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
