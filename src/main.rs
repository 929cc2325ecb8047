use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{debug, info};

mod api;
mod auth_bridge;
mod cache;
mod import;
mod local_bookmarks;
mod mirror;
mod normalize;
mod progress;
mod relay;
mod scheduler;
mod settings;
mod sse;
#[cfg(test)]
mod testserver;

use api::{require_session, FuzeClient, NewBookmark, VerifyOutcome};
use auth_bridge::{AuthBridge, CredentialSlot};
use cache::BookmarkIdCache;
use import::{ImportEvent, ImportLimit, ImportPhase, IMPORT_CEILING};
use local_bookmarks::BookmarkSource;
use normalize::is_internal_url;
use relay::UiEvent;
use scheduler::SchedulerConfig;
use settings::{SettingsStore, DEFAULT_API_URL};

#[derive(Parser)]
#[command(name = "fuze-sync")]
#[command(about = "Mirror native browser bookmarks to a Fuze bookmarking server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to Fuze and store the session token
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// API base URL (defaults to the configured or platform URL)
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Show connection and session status
    Status,

    /// Save a single bookmark to Fuze
    Add {
        #[arg(short, long)]
        url: String,

        /// Title (defaults to the URL)
        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short, long, default_value = "other")]
        category: String,

        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },

    /// Remove a bookmark from Fuze by URL
    Remove {
        #[arg(short, long)]
        url: String,
    },

    /// List bookmarks stored in Fuze
    List,

    /// Import all local bookmarks into Fuze with progress monitoring
    Import {
        /// Local source: chromium, firefox, or html
        #[arg(short, long, default_value = "chromium")]
        source: String,

        /// Explicit path to the bookmark store or export file
        #[arg(short, long)]
        file: Option<String>,

        /// Above the 1000 limit: import only the first 1000, original order
        #[arg(long)]
        first_1000: bool,

        /// Above the 1000 limit: import everything anyway
        #[arg(long)]
        all: bool,
    },

    /// Watch local bookmarks and mirror changes to Fuze
    Watch {
        /// Cron expression (default: every 5 minutes)
        #[arg(long, default_value = "0 */5 * * * *")]
        cron: String,

        /// Local source: chromium, firefox, or html
        #[arg(short, long, default_value = "chromium")]
        source: String,

        /// Explicit path to the bookmark store or export file
        #[arg(short, long)]
        file: Option<String>,

        /// Run as daemon
        #[arg(short, long)]
        daemon: bool,
    },

    /// Preview what a mirror pass would push, without pushing
    Diff {
        /// Local source: chromium, firefox, or html
        #[arg(short, long, default_value = "chromium")]
        source: String,

        /// Explicit path to the bookmark store or export file
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Show or change stored settings
    Config {
        /// Set the API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Enable or disable automatic mirroring (true/false)
        #[arg(long)]
        auto_sync: Option<bool>,

        /// Clear the stored session token
        #[arg(long)]
        logout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Login {
            email,
            password,
            api_url,
        } => {
            let mut store = SettingsStore::open()?;
            let api_url = api_url
                .or_else(|| store.settings().api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());

            info!("🔐 Logging in to {}", api_url);
            let client = FuzeClient::new();
            let token = client.login(&api_url, &email, &password).await?;
            store.set_session(token, api_url)?;
            info!("✅ Logged in to Fuze as {}", email);
        }

        Commands::Status => {
            let mut store = SettingsStore::open()?;
            match require_session(store.settings()) {
                Err(e) => println!("{}", e),
                Ok(session) => {
                    let client = FuzeClient::new();
                    match client.verify(&session).await {
                        VerifyOutcome::Valid => println!("Connected"),
                        // An unreachable server is not an invalid session
                        VerifyOutcome::Unreachable => println!("Connected (offline)"),
                        VerifyOutcome::Invalid => {
                            store.clear_session()?;
                            println!("Session expired - please login");
                        }
                    }
                }
            }
        }

        Commands::Add {
            url,
            title,
            description,
            category,
            tags,
        } => {
            if is_internal_url(&url) {
                eprintln!("❌ Cannot save browser internal pages");
                std::process::exit(1);
            }

            let store = SettingsStore::open()?;
            let session = require_session(store.settings())?;
            let client = FuzeClient::new();

            let spinner = progress::create_spinner("Checking server connection...");
            let reachable = client.health(&session.api_url).await;
            spinner.finish_and_clear();
            if !reachable {
                anyhow::bail!(
                    "Could not connect to Fuze. Please check your API URL and server status."
                );
            }

            let bookmark = NewBookmark {
                title: title.unwrap_or_else(|| url.clone()),
                url,
                description,
                category: category.to_lowercase(),
                tags: tags
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
            };

            let mut cache = BookmarkIdCache::new();
            let outcome = client.create(&bookmark, &session, &mut cache).await?;
            debug!("Remote bookmark id: {}", outcome.id);
            if outcome.was_duplicate {
                info!("🔁 Updated \"{}\" in Fuze", bookmark.title);
            } else {
                info!("✅ Saved \"{}\" to Fuze", bookmark.title);
            }
        }

        Commands::Remove { url } => {
            let store = SettingsStore::open()?;
            let session = require_session(store.settings())?;
            let client = FuzeClient::new();
            let mut cache = BookmarkIdCache::new();

            client.delete_by_url(&url, &session, &mut cache).await?;
            info!("✅ Removed bookmark from Fuze");
        }

        Commands::List => {
            let store = SettingsStore::open()?;
            let session = require_session(store.settings())?;
            let client = FuzeClient::new();

            let bookmarks = client.list(&session).await?;
            info!("📋 {} bookmarks in Fuze", bookmarks.len());
            for bookmark in bookmarks {
                println!("  {}  {}", bookmark.title, bookmark.url);
            }
        }

        Commands::Import {
            source,
            file,
            first_1000,
            all,
        } => {
            let source = BookmarkSource::resolve(&source, file.as_deref().map(Path::new))?;

            info!("📖 Collecting local bookmarks");
            let entries = source.read()?;
            if entries.is_empty() {
                info!("No local bookmarks found, nothing to import");
                return Ok(());
            }
            info!("📚 Collected {} bookmarks", entries.len());

            let entries = if entries.len() > IMPORT_CEILING {
                let choice = resolve_limit_choice(entries.len(), first_1000, all)?;
                import::apply_ceiling(entries, choice)
            } else {
                entries
            };

            let settings = SettingsStore::open_shared()?;
            let mut relay = relay::spawn_relay(settings);
            if !relay.start_import(entries).await {
                anyhow::bail!("Background relay is unavailable");
            }

            let bar = progress::create_import_progress_bar();
            bar.set_message("Submitting import request...");

            while let Some(event) = relay.next_event().await {
                match event {
                    UiEvent::Import(ImportEvent::PhaseChanged(phase)) => match phase {
                        ImportPhase::Submitting => bar.set_message("Submitting import request..."),
                        ImportPhase::AwaitingProgress => bar.set_message("Waiting for progress..."),
                        ImportPhase::Streaming => bar.set_message("Streaming progress"),
                        ImportPhase::Polling => bar.set_message("Polling progress"),
                        _ => {}
                    },
                    UiEvent::Import(ImportEvent::Progress(snapshot)) => {
                        progress::update_from_snapshot(&bar, &snapshot);
                    }
                    UiEvent::Import(ImportEvent::Completed(snapshot)) => {
                        progress::finish_with_success(
                            &bar,
                            &format!(
                                "Import complete: {} added, {} skipped, {} errors",
                                snapshot.added, snapshot.skipped, snapshot.errors
                            ),
                        );
                        break;
                    }
                    UiEvent::Import(ImportEvent::Failed { reason, in_flight }) => {
                        progress::finish_with_error(&bar, &reason);
                        if let Some(snapshot) = in_flight {
                            eprintln!(
                                "   In-flight import: {}/{} processed",
                                snapshot.processed, snapshot.total
                            );
                        }
                        std::process::exit(1);
                    }
                    UiEvent::AuthChanged { .. } => {}
                }
            }
        }

        Commands::Watch {
            cron,
            source,
            file,
            daemon,
        } => {
            let source = BookmarkSource::resolve(&source, file.as_deref().map(Path::new))?;
            let settings = SettingsStore::open_shared()?;

            // Keep the stored token in step with the platform session
            match CredentialSlot::default_slot() {
                Ok(slot) => {
                    tokio::spawn(AuthBridge::new(slot, settings.clone()).run());
                }
                Err(e) => debug!("Credential slot unavailable: {}", e),
            }

            info!("👀 Watching local bookmarks, cron: {}", cron);
            let config = SchedulerConfig::new(cron, daemon);
            scheduler::start_scheduler(config, settings, source).await?;
        }

        Commands::Diff { source, file } => {
            let source = BookmarkSource::resolve(&source, file.as_deref().map(Path::new))?;
            let settings = SettingsStore::open_shared()?;
            let mut engine = mirror::MirrorEngine::new(settings)?;
            engine.run_pass(&source, true).await?;
        }

        Commands::Config {
            api_url,
            auto_sync,
            logout,
        } => {
            let mut store = SettingsStore::open()?;
            if let Some(api_url) = api_url {
                store.set_api_url(api_url)?;
                info!("✅ API URL updated");
            }
            if let Some(auto_sync) = auto_sync {
                store.set_auto_sync(auto_sync)?;
                info!("✅ Auto-sync {}", if auto_sync { "enabled" } else { "disabled" });
            }
            if logout {
                store.clear_session()?;
                info!("✅ Session cleared");
            }

            let current = store.settings();
            println!(
                "apiUrl:    {}",
                current.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "authToken: {}",
                if current.auth_token.is_some() {
                    "(stored)"
                } else {
                    "(none)"
                }
            );
            println!("autoSync:  {}", current.auto_sync);
        }
    }

    Ok(())
}

/// Above the import ceiling the user decides: first N in original order,
/// or everything. Flags take precedence; otherwise ask on the terminal.
fn resolve_limit_choice(count: usize, first_1000: bool, all: bool) -> Result<ImportLimit> {
    if first_1000 && all {
        anyhow::bail!("--first-1000 and --all are mutually exclusive");
    }
    if first_1000 {
        return Ok(ImportLimit::FirstN);
    }
    if all {
        return Ok(ImportLimit::All);
    }

    println!(
        "Found {} bookmarks, above the {} per-import limit.",
        count, IMPORT_CEILING
    );
    print!("Import [f]irst {} in original order, or [a]ll? (f/a): ", IMPORT_CEILING);
    use std::io::{self, Write};
    io::stdout().flush().ok();

    let mut input = String::new();
    io::stdin().read_line(&mut input).ok();

    match input.trim().to_lowercase().as_str() {
        "f" | "first" => Ok(ImportLimit::FirstN),
        "a" | "all" => Ok(ImportLimit::All),
        _ => anyhow::bail!("Unrecognized choice, aborting import"),
    }
}
