use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Error taxonomy for the configuration store.
///
/// The variants group into the classes the web layer cares about:
/// validation (`Validation`), authentication (`InvalidPassword`), store
/// state (`Locked`, `PasswordNotSet`, `PasswordAlreadySet`), persistence
/// (`Persistence`, `Io`) and cryptography (`Crypto`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    /// Password mismatch. Deliberately carries no detail: a wrong password
    /// and a corrupted metadata row are indistinguishable to the caller.
    #[error("invalid password")]
    InvalidPassword,

    #[error("configuration store is locked")]
    Locked,

    #[error("configuration password has not been set")]
    PasswordNotSet,

    #[error("configuration password is already set")]
    PasswordAlreadySet,

    #[error("configuration storage failed: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("configuration storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl StoreError {
    /// True for failures caused purely by the lock state of the store.
    ///
    /// The coordinator treats these as non-fatal when persisting an
    /// in-memory update: the configuration keeps working for the current
    /// process, it simply is not durable yet.
    #[must_use]
    pub fn is_lock_state(&self) -> bool {
        matches!(self, Self::Locked | Self::PasswordNotSet)
    }

    /// True when the operation failed because the supplied password did
    /// not verify.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidPassword)
    }
}
