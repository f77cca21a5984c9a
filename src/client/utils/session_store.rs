use std::path::PathBuf;
use std::sync::Mutex;

use keyring::Entry;

use crate::client::utils::jwt::{self, TokenIdentity};

const SERVICE: &str = "studygroup_client";
const USER: &str = "studygroup_session";
const FALLBACK_TOKEN_FILE: &str = "session_token.txt";
const LAST_VIEW_FILE: &str = "last_view.txt";

/// Where the bearer token lives between runs. The keyring is the normal
/// backend; tests and embedders can swap in an in-memory one.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str) -> anyhow::Result<()>;
    fn clear(&self);
}

/// OS keyring entry, with an optional plain-file fallback that must be
/// explicitly enabled via `KEYRING_FALLBACK=true` (headless machines).
pub struct KeyringStorage;

fn fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

fn data_path(file: &str) -> PathBuf {
    PathBuf::from("data").join(file)
}

impl TokenStorage for KeyringStorage {
    fn load(&self) -> Option<String> {
        let entry = Entry::new(SERVICE, USER);
        match entry.get_password() {
            Ok(t) if !t.trim().is_empty() => Some(t),
            Ok(_) => None,
            Err(_e) => {
                if fallback_enabled() {
                    let path = data_path(FALLBACK_TOKEN_FILE);
                    if let Ok(s) = std::fs::read_to_string(&path) {
                        let t = s.trim().to_string();
                        if !t.is_empty() {
                            return Some(t);
                        }
                    }
                }
                None
            }
        }
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        let entry = Entry::new(SERVICE, USER);
        match entry.set_password(token) {
            Ok(()) => Ok(()),
            Err(_e) => {
                if fallback_enabled() {
                    let path = data_path(FALLBACK_TOKEN_FILE);
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    std::fs::write(&path, token)?;
                    log::warn!("[SESSION_STORE] keyring unavailable, persisted token to fallback file");
                    Ok(())
                } else {
                    // do not persist to disk silently; the caller decides
                    Err(anyhow::anyhow!("keyring unavailable and file fallback disabled"))
                }
            }
        }
    }

    fn clear(&self) {
        let entry = Entry::new(SERVICE, USER);
        let _ = entry.delete_password();
        if fallback_enabled() {
            let path = data_path(FALLBACK_TOKEN_FILE);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// In-memory token storage for tests and embedders that manage persistence
/// themselves.
#[derive(Default)]
pub struct MemoryStorage {
    token: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        *self.token.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) {
        *self.token.lock().unwrap() = None;
    }
}

/// Holds the opaque bearer credential and derives identity from it. The
/// token is the sole source of truth for identity; an expired token is
/// equivalent to no session and is purged on sight.
pub struct SessionStore {
    storage: Box<dyn TokenStorage>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_storage(Box::new(KeyringStorage))
    }

    pub fn with_storage(storage: Box<dyn TokenStorage>) -> Self {
        Self { storage }
    }

    pub fn token(&self) -> Option<String> {
        self.storage.load()
    }

    pub fn set_token(&self, token: &str) -> anyhow::Result<()> {
        self.storage.save(token)
    }

    pub fn clear_token(&self) {
        self.storage.clear();
    }

    /// Identity derived from the stored token. Any invalid token (missing,
    /// malformed, expired) is purged from storage and yields `None`.
    pub fn identity(&self) -> Option<TokenIdentity> {
        let token = self.storage.load()?;
        if !jwt::is_valid(&token) {
            log::info!("[SESSION_STORE] stored token invalid or expired, purging");
            self.storage.clear();
            return None;
        }
        jwt::identity(&token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Last-selected dashboard view, persisted for continuity across restarts.
pub fn save_last_view(view: &str) {
    let path = data_path(LAST_VIEW_FILE);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&path, view) {
        log::warn!("[SESSION_STORE] could not persist last view: {}", e);
    }
}

pub fn load_last_view() -> Option<String> {
    let s = std::fs::read_to_string(data_path(LAST_VIEW_FILE)).ok()?;
    let v = s.trim().to_string();
    (!v.is_empty()).then_some(v)
}
