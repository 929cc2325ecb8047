//! Picks up the Fuze platform session from its local credential slot and
//! relays transitions into the settings store.
//!
//! The platform app writes its session token to a JSON file under the
//! user's home directory. There is no change notification for that file,
//! so the bridge re-checks on a backoff schedule: frequent right after a
//! change, settling down when nothing happens. If the slot or its
//! directory disappears mid-operation that is a normal lifecycle event
//! (platform logged out or uninstalled), never a user-facing error.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::settings::{SharedSettings, DEFAULT_API_URL};

/// Re-check schedule: start 30s, grow by 1.5x, cap at 300s
const BACKOFF_INITIAL: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Exponential backoff with explicit next-delay computation.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        Self {
            initial,
            factor,
            cap,
            current: initial,
        }
    }

    /// The delay to sleep now; the following one will be longer
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::from_secs_f64(self.current.as_secs_f64() * self.factor);
        self.current = grown.min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// The platform's local credential slot, read-only from our side
#[derive(Debug, Clone)]
pub struct CredentialSlot {
    path: PathBuf,
}

impl CredentialSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_slot() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME not set")?;
        Ok(Self::new(
            PathBuf::from(home).join(".fuze").join("credentials.json"),
        ))
    }

    /// Current token, or None when logged out. A missing or unreadable
    /// slot reads as logged out; placeholder literals the platform has
    /// been known to write ("null", "undefined") count as logged out too.
    pub fn read_token(&self) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;
        let token = value.get("token")?.as_str()?.trim();
        if token.is_empty() || token == "null" || token == "undefined" {
            return None;
        }
        Some(token.to_string())
    }
}

/// Watches the credential slot and pushes session transitions into the
/// settings store. Repeat observations of the same token are dropped.
pub struct AuthBridge {
    slot: CredentialSlot,
    settings: SharedSettings,
    backoff: Backoff,
    last_token: Option<String>,
}

impl AuthBridge {
    pub fn new(slot: CredentialSlot, settings: SharedSettings) -> Self {
        Self {
            slot,
            settings,
            backoff: Backoff::new(BACKOFF_INITIAL, BACKOFF_FACTOR, BACKOFF_CAP),
            last_token: None,
        }
    }

    /// Startup check, then periodic re-checks forever. Runs as its own task.
    pub async fn run(mut self) {
        self.check_once();
        loop {
            let delay = self.backoff.next_delay();
            debug!("Next credential re-check in {:?}", delay);
            tokio::time::sleep(delay).await;
            if self.check_once() {
                self.backoff.reset();
            }
        }
    }

    /// One observation of the slot. Returns whether a transition happened.
    pub fn check_once(&mut self) -> bool {
        let observed = self.slot.read_token();
        if observed == self.last_token {
            return false;
        }

        match &observed {
            Some(token) => {
                info!("🔑 Platform session detected, syncing token");
                let result = {
                    let mut store = self.settings.lock().expect("settings lock");
                    let api_url = store
                        .settings()
                        .api_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
                    store.set_session(token.clone(), api_url)
                };
                if let Err(e) = result {
                    debug!("Could not persist platform token: {}", e);
                }
            }
            None => {
                info!("🔒 Platform session cleared");
                let result = self
                    .settings
                    .lock()
                    .expect("settings lock")
                    .clear_session();
                if let Err(e) = result {
                    debug!("Could not clear stored token: {}", e);
                }
            }
        }

        self.last_token = observed;
        true
    }
}
