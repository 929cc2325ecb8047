use anyhow::{bail, Context, Result};
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::normalize::is_internal_url;

/// A bookmark as read from a local browser store. The category is the
/// parent folder title, lowercased; `other` when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalBookmark {
    pub url: String,
    pub title: String,
    pub category: String,
}

/// Where local bookmarks come from
#[derive(Debug, Clone)]
pub enum BookmarkSource {
    Chromium { bookmarks_file: PathBuf },
    Firefox { places_db: PathBuf },
    HtmlExport { file: PathBuf },
}

impl BookmarkSource {
    /// Resolve a source from a CLI kind and optional explicit path
    pub fn resolve(kind: &str, file: Option<&Path>) -> Result<Self> {
        match kind.to_lowercase().as_str() {
            "chromium" | "chrome" | "brave" => Ok(Self::Chromium {
                bookmarks_file: match file {
                    Some(path) => path.to_path_buf(),
                    None => discover_chromium_bookmarks()?,
                },
            }),
            "firefox" => Ok(Self::Firefox {
                places_db: match file {
                    Some(path) => path.to_path_buf(),
                    None => discover_firefox_places()?,
                },
            }),
            "html" => match file {
                Some(path) => Ok(Self::HtmlExport {
                    file: path.to_path_buf(),
                }),
                None => bail!("The html source needs an explicit --file path"),
            },
            other => bail!("Unknown source '{}'. Use chromium, firefox, or html", other),
        }
    }

    /// Read all bookmarks, preserving the store's traversal order
    pub fn read(&self) -> Result<Vec<LocalBookmark>> {
        match self {
            Self::Chromium { bookmarks_file } => {
                let data = std::fs::read_to_string(bookmarks_file).with_context(|| {
                    format!("Failed to read Chromium bookmarks at {:?}", bookmarks_file)
                })?;
                let json: serde_json::Value =
                    serde_json::from_str(&data).context("Invalid Chromium bookmarks file")?;
                Ok(parse_chromium_tree(&json))
            }
            Self::Firefox { places_db } => read_firefox_places(places_db),
            Self::HtmlExport { file } => {
                let html = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read bookmark export at {:?}", file))?;
                Ok(parse_bookmarks_html(&html))
            }
        }
    }
}

pub fn normalize_category(folder: &str) -> String {
    let trimmed = folder.trim();
    if trimmed.is_empty() {
        "other".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Flatten a Chromium `Bookmarks` JSON tree. Folders become categories
/// for their direct children; internal browser pages are skipped.
pub fn parse_chromium_tree(json: &serde_json::Value) -> Vec<LocalBookmark> {
    let mut bookmarks = Vec::new();
    if let Some(roots) = json.get("roots").and_then(|v| v.as_object()) {
        for root in roots.values() {
            let folder = root.get("name").and_then(|v| v.as_str()).unwrap_or("");
            walk_chromium_node(root, folder, &mut bookmarks);
        }
    }
    bookmarks
}

fn walk_chromium_node(node: &serde_json::Value, category: &str, out: &mut Vec<LocalBookmark>) {
    let Some(children) = node.get("children").and_then(|v| v.as_array()) else {
        return;
    };

    for child in children {
        let name = child.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if child.get("type").and_then(|v| v.as_str()) == Some("folder") {
            let next = if name.is_empty() { category } else { name };
            walk_chromium_node(child, next, out);
        } else if let Some(url) = child.get("url").and_then(|v| v.as_str()) {
            if name.is_empty() || is_internal_url(url) {
                continue;
            }
            out.push(LocalBookmark {
                url: url.to_string(),
                title: name.to_string(),
                category: normalize_category(category),
            });
        }
    }
}

/// Read bookmarks from a Firefox `places.sqlite`, with the parent folder
/// title as category.
pub fn read_firefox_places(db_path: &Path) -> Result<Vec<LocalBookmark>> {
    use rusqlite::Connection;

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open Firefox database at {:?}", db_path))?;
    let mut bookmarks = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT p.url, b.title, pb.title
         FROM moz_bookmarks b
         JOIN moz_places p ON b.fk = p.id
         LEFT JOIN moz_bookmarks pb ON b.parent = pb.id
         WHERE b.type = 1 AND p.url IS NOT NULL
         ORDER BY b.position",
    )?;

    let rows = stmt.query_map([], |row| {
        let url: String = row.get(0)?;
        let title: Option<String> = row.get(1)?;
        let folder: Option<String> = row.get(2)?;
        Ok((url, title, folder))
    })?;

    for row in rows {
        let (url, title, folder) = row?;
        if is_internal_url(&url) {
            continue;
        }
        let title = title.unwrap_or_else(|| url.clone());
        bookmarks.push(LocalBookmark {
            url,
            title,
            category: normalize_category(&folder.unwrap_or_default()),
        });
    }

    debug!("Read {} bookmarks from Firefox database", bookmarks.len());
    Ok(bookmarks)
}

/// Parse a Netscape-format bookmarks HTML export. Folder headers (H3)
/// set the category for the anchors that follow them at the same level.
pub fn parse_bookmarks_html(html: &str) -> Vec<LocalBookmark> {
    let document = Html::parse_document(html);
    let mut bookmarks = Vec::new();
    walk_export_node(document.root_element(), "", &mut bookmarks);
    bookmarks
}

fn walk_export_node(node: ElementRef, category: &str, out: &mut Vec<LocalBookmark>) {
    let mut current = category.to_string();
    for child in node.children() {
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };
        match element.value().name() {
            "h3" => {
                current = element.text().collect::<String>().trim().to_string();
            }
            "a" => {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let title = element.text().collect::<String>().trim().to_string();
                if title.is_empty() || is_internal_url(href) {
                    continue;
                }
                out.push(LocalBookmark {
                    url: href.to_string(),
                    title,
                    category: normalize_category(&current),
                });
            }
            _ => walk_export_node(element, &current, out),
        }
    }
}

/// Find a Chromium-family `Bookmarks` file across the usual profile roots
pub fn discover_chromium_bookmarks() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME not set")?;
    let candidates = [
        format!("{}/Library/Application Support/Google/Chrome", home),
        format!(
            "{}/Library/Application Support/BraveSoftware/Brave-Browser",
            home
        ),
        format!("{}/.config/google-chrome", home),
        format!("{}/.config/chromium", home),
        format!("{}/.config/BraveSoftware/Brave-Browser", home),
    ];

    for base in &candidates {
        let base = Path::new(base);
        if !base.exists() {
            continue;
        }
        for entry in WalkDir::new(base)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && entry.file_name() == "Bookmarks" {
                debug!("Found Chromium bookmarks at: {:?}", entry.path());
                return Ok(entry.path().to_path_buf());
            }
        }
    }

    bail!("No Chromium bookmark store found. Pass --file with an explicit path")
}

/// Find a Firefox `places.sqlite` in the default profile directories
pub fn discover_firefox_places() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME not set")?;
    let candidates = [
        format!("{}/Library/Application Support/Firefox/Profiles", home),
        format!("{}/.mozilla/firefox", home),
    ];

    for base in &candidates {
        let base = Path::new(base);
        if !base.exists() {
            continue;
        }
        for entry in WalkDir::new(base)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && entry.file_name() == "places.sqlite" {
                debug!("Found Firefox places at: {:?}", entry.path());
                return Ok(entry.path().to_path_buf());
            }
        }
    }

    bail!("No Firefox profile found. Pass --file with an explicit path")
}
