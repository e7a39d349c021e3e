//! Persisted client-side credentials.
//!
//! The on-disk format is a flat JSON object of string keys, the same shape
//! the web frontend keeps in local storage. The bearer token lives under
//! [`TOKEN_KEY`] and the signed-in user record under [`USER_KEY`].

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Credential store lock poisoned")]
    LockPoisoned,
}

pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Result<Option<String>, PersistenceError>;

    fn user(&self) -> Result<Option<Value>, PersistenceError>;

    fn save(&self, token: &str, user: Option<&Value>) -> Result<(), PersistenceError>;

    /// Remove the token and user record. Other keys are left untouched.
    fn clear(&self) -> Result<(), PersistenceError>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn load(path: &Path) -> Result<Map<String, Value>, PersistenceError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Map::new());
    }
    Ok(serde_json::from_str::<Map<String, Value>>(&contents)?)
}

pub fn save(path: &Path, state: &Map<String, Value>) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(state)?;
    std::fs::write(path, contents)?;
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Result<Option<String>, PersistenceError> {
        Ok(token_from(&load(&self.path)?))
    }

    fn user(&self) -> Result<Option<Value>, PersistenceError> {
        Ok(load(&self.path)?.get(USER_KEY).cloned())
    }

    fn save(&self, token: &str, user: Option<&Value>) -> Result<(), PersistenceError> {
        let mut state = load(&self.path)?;
        write_credentials(&mut state, token, user);
        save(&self.path, &state)
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        let mut state = load(&self.path)?;
        let removed_token = state.remove(TOKEN_KEY).is_some();
        let removed_user = state.remove(USER_KEY).is_some();
        if removed_token || removed_user {
            save(&self.path, &state)?;
        }
        Ok(())
    }
}

/// In-process store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Map<String, Value>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        let mut state = Map::new();
        write_credentials(&mut state, token, None);
        Self {
            state: Mutex::new(state),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Result<Option<String>, PersistenceError> {
        let state = self.state.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        Ok(token_from(&state))
    }

    fn user(&self) -> Result<Option<Value>, PersistenceError> {
        let state = self.state.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        Ok(state.get(USER_KEY).cloned())
    }

    fn save(&self, token: &str, user: Option<&Value>) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        write_credentials(&mut state, token, user);
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        state.remove(TOKEN_KEY);
        state.remove(USER_KEY);
        Ok(())
    }
}

fn token_from(state: &Map<String, Value>) -> Option<String> {
    state
        .get(TOKEN_KEY)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn write_credentials(state: &mut Map<String, Value>, token: &str, user: Option<&Value>) {
    state.insert(TOKEN_KEY.to_string(), Value::String(token.to_string()));
    match user {
        Some(user) => {
            state.insert(USER_KEY.to_string(), user.clone());
        }
        None => {
            state.remove(USER_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("nested/credentials.json"));

        assert_eq!(store.token().unwrap(), None);
        store
            .save("abc123", Some(&json!({"email": "ana@example.com"})))
            .unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("abc123"));
        assert_eq!(store.user().unwrap(), Some(json!({"email": "ana@example.com"})));

        store.clear().unwrap();
        assert_eq!(store.token().unwrap(), None);
        assert_eq!(store.user().unwrap(), None);
    }

    #[test]
    fn test_clear_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        let mut state = Map::new();
        state.insert("settings".into(), json!({"notifications": {"analysis": true}}));
        state.insert(TOKEN_KEY.into(), json!("t"));
        save(&path, &state).unwrap();

        FileCredentialStore::new(&path).clear().unwrap();

        let reloaded = load(&path).unwrap();
        assert!(reloaded.contains_key("settings"));
        assert!(!reloaded.contains_key(TOKEN_KEY));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileCredentialStore::new(&path).token(),
            Err(PersistenceError::Serde(_))
        ));
    }

    #[test]
    fn test_memory_store_ignores_empty_token() {
        let store = MemoryCredentialStore::with_token("");
        assert_eq!(store.token().unwrap(), None);

        store.save("t1", None).unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("t1"));
        store.clear().unwrap();
        assert_eq!(store.token().unwrap(), None);
    }
}
