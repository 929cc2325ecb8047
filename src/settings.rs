use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// Default Fuze backend, used until the user configures their own
pub const DEFAULT_API_URL: &str = "https://fuze-backend.onrender.com";

/// Authenticated session: token and server address are one atomic unit.
/// A session with only one of the two does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub api_url: String,
}

/// Persisted extension settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auth_token: Option<String>,
    pub api_url: Option<String>,
    pub auto_sync: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_token: None,
            api_url: None,
            auto_sync: true,
            updated_at: Utc::now(),
        }
    }
}

/// Session transition, published to subscribers
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SessionEstablished(String),
    SessionCleared,
}

pub type SharedSettings = Arc<Mutex<SettingsStore>>;

/// Owned settings store, persisted as JSON under the user's home directory.
///
/// Token and API URL are always written together; readers between await
/// points never observe one updated and the other stale.
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    auth_tx: broadcast::Sender<AuthEvent>,
}

impl SettingsStore {
    pub fn open() -> Result<Self> {
        Self::open_at(Self::default_path()?)
    }

    pub fn open_shared() -> Result<SharedSettings> {
        Ok(Arc::new(Mutex::new(Self::open()?)))
    }

    pub fn open_at(path: PathBuf) -> Result<Self> {
        let settings = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file at {:?}", path))?
        } else {
            Settings::default()
        };

        let (auth_tx, _) = broadcast::channel(16);
        Ok(Self {
            path,
            settings,
            auth_tx,
        })
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(Mutex::new(self))
    }

    fn default_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME not set")?;
        Ok(PathBuf::from(home).join(".fuze-sync").join("settings.json"))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Both credential fields or nothing
    pub fn session(&self) -> Option<Session> {
        match (&self.settings.auth_token, &self.settings.api_url) {
            (Some(token), Some(api_url)) => Some(Session {
                token: token.clone(),
                api_url: api_url.clone(),
            }),
            _ => None,
        }
    }

    /// Store token and API URL as one atomic pair
    pub fn set_session(&mut self, token: String, api_url: String) -> Result<()> {
        self.settings.auth_token = Some(token.clone());
        self.settings.api_url = Some(api_url);
        self.save()?;
        let _ = self.auth_tx.send(AuthEvent::SessionEstablished(token));
        Ok(())
    }

    /// Drop the token, keep the configured server address
    pub fn clear_session(&mut self) -> Result<()> {
        self.settings.auth_token = None;
        self.save()?;
        let _ = self.auth_tx.send(AuthEvent::SessionCleared);
        Ok(())
    }

    pub fn set_api_url(&mut self, api_url: String) -> Result<()> {
        self.settings.api_url = Some(api_url);
        self.save()
    }

    pub fn set_auto_sync(&mut self, auto_sync: bool) -> Result<()> {
        self.settings.auto_sync = auto_sync;
        self.save()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    fn save(&mut self) -> Result<()> {
        self.settings.updated_at = Utc::now();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        debug!("Settings saved to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::open_at(dir.path().join("settings.json")).expect("open");
        (dir, store)
    }

    #[test]
    fn auto_sync_defaults_to_true_on_first_run() {
        let (_dir, store) = scratch_store();
        assert!(store.settings().auto_sync);
        assert!(store.session().is_none());
    }

    #[test]
    fn session_requires_both_fields() {
        let (_dir, mut store) = scratch_store();

        store.set_api_url("http://localhost:3000".to_string()).unwrap();
        assert!(store.session().is_none());

        store
            .set_session("tok-1".to_string(), "http://localhost:3000".to_string())
            .unwrap();
        let session = store.session().expect("session");
        assert_eq!(session.token, "tok-1");
        assert_eq!(session.api_url, "http://localhost:3000");
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");

        {
            let mut store = SettingsStore::open_at(path.clone()).unwrap();
            store
                .set_session("tok-2".to_string(), "http://fuze.test".to_string())
                .unwrap();
            store.set_auto_sync(false).unwrap();
        }

        let reloaded = SettingsStore::open_at(path).unwrap();
        assert_eq!(reloaded.settings().auth_token.as_deref(), Some("tok-2"));
        assert_eq!(reloaded.settings().api_url.as_deref(), Some("http://fuze.test"));
        assert!(!reloaded.settings().auto_sync);
    }

    #[test]
    fn clear_session_keeps_api_url() {
        let (_dir, mut store) = scratch_store();
        store
            .set_session("tok-3".to_string(), "http://fuze.test".to_string())
            .unwrap();
        store.clear_session().unwrap();

        assert!(store.session().is_none());
        assert_eq!(store.settings().api_url.as_deref(), Some("http://fuze.test"));
    }

    #[test]
    fn subscribers_observe_session_transitions() {
        let (_dir, mut store) = scratch_store();
        let mut rx = store.subscribe();

        store
            .set_session("tok-4".to_string(), "http://fuze.test".to_string())
            .unwrap();
        store.clear_session().unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(AuthEvent::SessionEstablished(token)) if token == "tok-4"
        ));
        assert!(matches!(rx.try_recv(), Ok(AuthEvent::SessionCleared)));
    }
}
