//! Mirrors native bookmark changes to the Fuze server.
//!
//! There is no change event for local browser stores, so each pass takes
//! a full snapshot, fingerprints every entry, and diffs against the
//! fingerprints persisted from the previous pass. New or edited entries
//! are created remotely (the server folds duplicates into updates);
//! entries that disappeared are deleted remotely. Failed entries are
//! reported and skipped; there is no retry queue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::api::{require_session, ApiError, FuzeClient, NewBookmark};
use crate::cache::BookmarkIdCache;
use crate::local_bookmarks::{BookmarkSource, LocalBookmark};
use crate::normalize::normalize_url;
use crate::settings::SharedSettings;

/// Fingerprints from the previous pass, persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorState {
    pub last_run: DateTime<Utc>,
    /// normalized url -> fingerprint of (url, title, category)
    pub fingerprints: HashMap<String, String>,
}

impl MirrorState {
    pub fn new() -> Self {
        Self {
            last_run: Utc::now(),
            fingerprints: HashMap::new(),
        }
    }

    pub fn load(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read mirror state at {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid mirror state at {:?}", path))
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write mirror state to {:?}", path))
    }
}

impl Default for MirrorState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorChange {
    Added(LocalBookmark),
    Removed(String),
}

#[derive(Debug, Default, Clone)]
pub struct MirrorStats {
    pub saved: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
}

pub fn fingerprint(bookmark: &LocalBookmark) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bookmark.url.as_bytes());
    hasher.update([0u8]);
    hasher.update(bookmark.title.as_bytes());
    hasher.update([0u8]);
    hasher.update(bookmark.category.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Diff the current snapshot against the previous fingerprints.
/// An edited bookmark shows up as Added; the server deduplicates by URL.
pub fn detect_changes(
    current: &[LocalBookmark],
    previous: &HashMap<String, String>,
) -> Vec<MirrorChange> {
    let mut changes = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    for bookmark in current {
        let key = normalize_url(&bookmark.url);
        let print = fingerprint(bookmark);
        match previous.get(&key) {
            Some(old) if *old == print => {}
            _ => changes.push(MirrorChange::Added(bookmark.clone())),
        }
        seen.insert(key, print);
    }

    for url in previous.keys() {
        if !seen.contains_key(url) {
            changes.push(MirrorChange::Removed(url.clone()));
        }
    }

    changes
}

pub fn fingerprint_map(bookmarks: &[LocalBookmark]) -> HashMap<String, String> {
    bookmarks
        .iter()
        .map(|b| (normalize_url(&b.url), fingerprint(b)))
        .collect()
}

pub struct MirrorEngine {
    client: FuzeClient,
    cache: BookmarkIdCache,
    settings: SharedSettings,
    state_path: PathBuf,
}

impl MirrorEngine {
    pub fn new(settings: SharedSettings) -> Result<Self> {
        let home = std::env::var("HOME").context("HOME not set")?;
        let state_path = PathBuf::from(home).join(".fuze-sync").join("state.json");
        Ok(Self::with_state_path(settings, state_path))
    }

    pub fn with_state_path(settings: SharedSettings, state_path: PathBuf) -> Self {
        Self {
            client: FuzeClient::new(),
            cache: BookmarkIdCache::new(),
            settings,
            state_path,
        }
    }

    /// One mirror pass: snapshot, diff, push changes, persist fingerprints.
    pub async fn run_pass(&mut self, source: &BookmarkSource, dry_run: bool) -> Result<MirrorStats> {
        let (auto_sync, session) = {
            let store = self.settings.lock().expect("settings lock");
            (
                store.settings().auto_sync,
                require_session(store.settings()),
            )
        };

        if !auto_sync {
            info!("⏸  Auto-sync is disabled, skipping mirror pass");
            return Ok(MirrorStats::default());
        }
        let session = session?;

        info!("📖 Reading local bookmarks");
        let current = source.read()?;
        let mut state = MirrorState::load(&self.state_path)?;
        let changes = detect_changes(&current, &state.fingerprints);

        let added_count = changes
            .iter()
            .filter(|c| matches!(c, MirrorChange::Added(_)))
            .count();
        info!(
            "🔍 Detected {} new or edited, {} removed",
            added_count,
            changes.len() - added_count
        );

        if dry_run {
            for change in &changes {
                match change {
                    MirrorChange::Added(bookmark) => info!("  + {}", bookmark.url),
                    MirrorChange::Removed(url) => info!("  - {}", url),
                }
            }
            info!("🏃 Dry run mode, no changes pushed");
            return Ok(MirrorStats::default());
        }

        let mut stats = MirrorStats::default();
        for change in changes {
            match change {
                MirrorChange::Added(bookmark) => {
                    let payload = NewBookmark {
                        url: bookmark.url.clone(),
                        title: bookmark.title.clone(),
                        description: String::new(),
                        category: bookmark.category.clone(),
                        tags: vec![],
                    };
                    match self.client.create(&payload, &session, &mut self.cache).await {
                        Ok(outcome) if outcome.was_duplicate => {
                            debug!("Updated \"{}\" in Fuze", bookmark.title);
                            stats.updated += 1;
                        }
                        Ok(_) => {
                            debug!("Saved \"{}\" to Fuze", bookmark.title);
                            stats.saved += 1;
                        }
                        Err(e) => {
                            warn!("⚠️  Failed to save \"{}\": {}", bookmark.title, e);
                            stats.failed += 1;
                        }
                    }
                }
                MirrorChange::Removed(url) => {
                    match self.client.delete_by_url(&url, &session, &mut self.cache).await {
                        Ok(()) => {
                            debug!("Removed {} from Fuze", url);
                            stats.removed += 1;
                        }
                        Err(ApiError::NotFound) => {
                            debug!("{} was already gone remotely", url);
                        }
                        Err(e) => {
                            warn!("⚠️  Failed to remove {}: {}", url, e);
                            stats.failed += 1;
                        }
                    }
                }
            }
        }

        state.fingerprints = fingerprint_map(&current);
        state.last_run = Utc::now();
        state.save(&self.state_path)?;
        debug!("Identity cache holds {} entries", self.cache.len());

        info!(
            "✅ Mirror pass complete: {} saved, {} updated, {} removed, {} failed",
            stats.saved, stats.updated, stats.removed, stats.failed
        );
        Ok(stats)
    }
}
