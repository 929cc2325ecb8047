//! One-hop message relay between the foreground (CLI surface) and the
//! background task that owns the network client.
//!
//! The foreground never performs network calls itself: it sends commands
//! down one typed channel and consumes discrete events from another. While
//! an import is active the relay is the sole authority over its state;
//! session-change notifications arriving in that window are dropped.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{require_session, FuzeClient, ImportSnapshot, VerifyOutcome};
use crate::import::{ImportEvent, ImportOrchestrator, ImportPhase, MonitorConfig};
use crate::local_bookmarks::LocalBookmark;
use crate::settings::{AuthEvent, SharedSettings};

#[derive(Debug)]
pub enum RelayCommand {
    StartImport { entries: Vec<LocalBookmark> },
    StopMonitoring,
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Import(ImportEvent),
    AuthChanged { authenticated: bool },
}

/// Foreground handle. Dropping it shuts the relay down.
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
    events: mpsc::Receiver<UiEvent>,
}

impl RelayHandle {
    pub async fn start_import(&self, entries: Vec<LocalBookmark>) -> bool {
        self.commands
            .send(RelayCommand::StartImport { entries })
            .await
            .is_ok()
    }

    pub async fn stop_monitoring(&self) -> bool {
        self.commands.send(RelayCommand::StopMonitoring).await.is_ok()
    }

    pub async fn next_event(&mut self) -> Option<UiEvent> {
        self.events.recv().await
    }
}

pub fn spawn_relay(settings: SharedSettings) -> RelayHandle {
    spawn_relay_with_config(settings, MonitorConfig::default())
}

pub fn spawn_relay_with_config(settings: SharedSettings, config: MonitorConfig) -> RelayHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, event_rx) = mpsc::channel(64);

    let auth_rx = settings.lock().expect("settings lock").subscribe();
    tokio::spawn(relay_loop(settings, config, cmd_rx, event_tx, auth_rx));

    RelayHandle {
        commands: cmd_tx,
        events: event_rx,
    }
}

async fn relay_loop(
    settings: SharedSettings,
    config: MonitorConfig,
    mut commands: mpsc::Receiver<RelayCommand>,
    events: mpsc::Sender<UiEvent>,
    mut auth_rx: broadcast::Receiver<AuthEvent>,
) {
    let client = FuzeClient::new();

    let mut import_task: Option<JoinHandle<()>> = None;
    let mut import_events: Option<mpsc::Receiver<ImportEvent>> = None;
    let mut import_active = false;
    let mut last_snapshot: Option<ImportSnapshot> = None;
    let mut last_token: Option<String> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RelayCommand::StartImport { entries }) => {
                    if import_active {
                        warn!("⚠️  Rejecting import: one is already being monitored");
                        let _ = events
                            .send(UiEvent::Import(ImportEvent::Failed {
                                reason: "An import is already in progress".to_string(),
                                in_flight: last_snapshot.clone(),
                            }))
                            .await;
                        continue;
                    }

                    let snapshot = settings.lock().expect("settings lock").settings().clone();
                    let (import_tx, import_rx) = mpsc::channel(64);
                    let mut orchestrator =
                        ImportOrchestrator::with_config(client.clone(), import_tx, config.clone());
                    import_task = Some(tokio::spawn(async move {
                        orchestrator.run(entries, &snapshot).await;
                    }));
                    import_events = Some(import_rx);
                    import_active = true;
                    last_snapshot = None;
                }
                Some(RelayCommand::StopMonitoring) => {
                    // Stops local observation only; the server-side job
                    // keeps running on its own.
                    if let Some(task) = import_task.take() {
                        task.abort();
                    }
                    import_events = None;
                    import_active = false;
                }
                None => {
                    if let Some(task) = import_task.take() {
                        task.abort();
                    }
                    break;
                }
            },

            event = recv_import(&mut import_events), if import_events.is_some() => match event {
                Some(event) => {
                    if let ImportEvent::Progress(ref snapshot) = event {
                        last_snapshot = Some(snapshot.clone());
                    }
                    let terminal = matches!(
                        event,
                        ImportEvent::PhaseChanged(ImportPhase::Completed | ImportPhase::Failed)
                    );
                    if events.send(UiEvent::Import(event)).await.is_err() {
                        break;
                    }
                    if terminal {
                        import_active = false;
                    }
                }
                None => {
                    // Orchestrator finished: release the subscription
                    import_events = None;
                    import_task = None;
                    import_active = false;
                }
            },

            auth = auth_rx.recv() => match auth {
                Ok(event) => {
                    if import_active {
                        debug!("Ignoring session change while an import is active");
                        continue;
                    }
                    match event {
                        AuthEvent::SessionEstablished(token) => {
                            if last_token.as_deref() == Some(token.as_str()) {
                                // Same token re-announced: nothing to re-verify
                                continue;
                            }
                            last_token = Some(token);
                            let session = settings
                                .lock()
                                .expect("settings lock")
                                .settings()
                                .clone();
                            let authenticated = match require_session(&session) {
                                Ok(session) => {
                                    client.verify(&session).await != VerifyOutcome::Invalid
                                }
                                Err(_) => false,
                            };
                            let _ = events.send(UiEvent::AuthChanged { authenticated }).await;
                        }
                        AuthEvent::SessionCleared => {
                            last_token = None;
                            let _ = events
                                .send(UiEvent::AuthChanged {
                                    authenticated: false,
                                })
                                .await;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Auth notifications lagged by {}", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn recv_import(rx: &mut Option<mpsc::Receiver<ImportEvent>>) -> Option<ImportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
