use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

const SERVICE: &str = "lablink";

/// The two token slots the session machine uses: the active bearer token and
/// the admin token saved while impersonating another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSlot {
    Session,
    Admin,
}

impl TokenSlot {
    pub fn entry_name(self) -> &'static str {
        match self {
            TokenSlot::Session => "token",
            TokenSlot::Admin => "admin_token",
        }
    }
}

/// Durable token storage, injected into the API client and the session store
/// so every request reads the current token instead of a cached copy.
pub trait TokenStore: Send + Sync {
    fn save(&self, slot: TokenSlot, token: &str) -> anyhow::Result<()>;
    fn load(&self, slot: TokenSlot) -> Option<String>;
    fn clear(&self, slot: TokenSlot) -> anyhow::Result<()>;
}

/// OS-keyring backed store. When the keyring is unavailable an opt-in file
/// fallback can be enabled with LABLINK_KEYRING_FALLBACK=true; tokens are
/// never written to disk silently.
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self
    }

    fn fallback_enabled() -> bool {
        std::env::var("LABLINK_KEYRING_FALLBACK").unwrap_or_default() == "true"
    }

    fn fallback_path(slot: TokenSlot) -> std::path::PathBuf {
        std::path::Path::new("data").join(format!("{}.txt", slot.entry_name()))
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, slot: TokenSlot, token: &str) -> anyhow::Result<()> {
        let entry = Entry::new(SERVICE, slot.entry_name());
        match entry.set_password(token) {
            Ok(()) => Ok(()),
            Err(_e) => {
                if Self::fallback_enabled() {
                    let path = Self::fallback_path(slot);
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    std::fs::write(&path, token)?;
                    log::warn!("keyring unavailable, persisted {} to fallback file", slot.entry_name());
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("keyring unavailable and file fallback disabled"))
                }
            }
        }
    }

    fn load(&self, slot: TokenSlot) -> Option<String> {
        let entry = Entry::new(SERVICE, slot.entry_name());
        match entry.get_password() {
            Ok(t) => {
                if t.trim().is_empty() {
                    None
                } else {
                    Some(t)
                }
            }
            Err(_e) => {
                if Self::fallback_enabled() {
                    let path = Self::fallback_path(slot);
                    if path.exists() {
                        if let Ok(s) = std::fs::read_to_string(&path) {
                            let t = s.trim().to_string();
                            if !t.is_empty() {
                                return Some(t);
                            }
                        }
                    }
                }
                None
            }
        }
    }

    fn clear(&self, slot: TokenSlot) -> anyhow::Result<()> {
        let entry = Entry::new(SERVICE, slot.entry_name());
        let _ = entry.delete_password();
        if Self::fallback_enabled() {
            let path = Self::fallback_path(slot);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    slots: Mutex<HashMap<TokenSlot, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, slot: TokenSlot, token: &str) -> anyhow::Result<()> {
        self.slots
            .lock()
            .expect("token store poisoned")
            .insert(slot, token.to_string());
        Ok(())
    }

    fn load(&self, slot: TokenSlot) -> Option<String> {
        self.slots
            .lock()
            .expect("token store poisoned")
            .get(&slot)
            .cloned()
    }

    fn clear(&self, slot: TokenSlot) -> anyhow::Result<()> {
        self.slots
            .lock()
            .expect("token store poisoned")
            .remove(&slot);
        Ok(())
    }
}
