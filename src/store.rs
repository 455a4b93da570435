use std::collections::HashMap;

use parking_lot::Mutex;

/// Storage keys owned by the session manager.
///
/// All values are session-scoped strings. Only [`crate::AuthSession`] writes
/// to these keys; the credential cache reads `id_token` and nothing else.
pub mod keys {
    pub const ID_TOKEN: &str = "id_token";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const PKCE_VERIFIER: &str = "pkce_verifier";
}

/// Consumer-provided session-scoped key-value storage.
///
/// The host shell backs this with whatever scopes to the browsing session
/// (browser session storage in a wasm host). Synchronous by design — the
/// storage it models is synchronous, and token reads happen on hot paths
/// like `is_authenticated()`.
///
/// # Example
///
/// ```rust,ignore
/// struct DomStore;
///
/// impl SessionStore for DomStore {
///     fn get(&self, key: &str) -> Option<String> {
///         web_sys::window()?.session_storage().ok()??.get_item(key).ok()?
///     }
///     // ...
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str);

    /// Remove a value. Removing an absent key is a no-op.
    fn remove(&self, key: &str);
}

/// In-memory [`SessionStore`] for native hosts and tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}
