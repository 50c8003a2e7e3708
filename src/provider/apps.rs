//! Application provider backed by freedesktop `.desktop` files.
//!
//! Scans the XDG application directories on load. Ids are
//! `app://<desktop file stem>`; keywords become entry tags so they take part
//! in matching.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use freedesktop_desktop_entry::DesktopEntry;
use walkdir::WalkDir;

use super::list::ListProvider;
use super::{ProviderContext, ProviderKind};
use crate::entry::EntryItem;

pub const SCHEME: &str = "app";

/// Standard XDG application directories, plus Flatpak and Snap exports.
pub fn default_application_dirs() -> Vec<PathBuf> {
    let mut dirs_to_scan: Vec<PathBuf> = vec![
        PathBuf::from("/usr/share/applications"),
        PathBuf::from("/usr/local/share/applications"),
    ];

    if let Some(data_home) = dirs::data_local_dir() {
        dirs_to_scan.push(data_home.join("applications"));
    }

    if let Some(home) = dirs::home_dir() {
        dirs_to_scan.push(home.join(".local/share/flatpak/exports/share/applications"));
    }

    dirs_to_scan.push(PathBuf::from("/var/lib/snapd/desktop/applications"));
    dirs_to_scan
}

/// Scan directories for visible applications, sorted by name.
pub fn scan_applications(dirs_to_scan: &[PathBuf]) -> Vec<EntryItem> {
    let mut entries = Vec::new();

    for dir in dirs_to_scan {
        if dir.exists() {
            scan_directory(dir, &mut entries);
        }
    }

    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    tracing::info!(count = entries.len(), "indexed applications");
    entries
}

fn scan_directory(dir: &Path, entries: &mut Vec<EntryItem>) {
    for entry in WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "desktop") {
            if let Some(app) = parse_desktop_file(path) {
                // First directory wins for duplicate ids
                if !entries.iter().any(|e| e.id == app.id) {
                    entries.push(app);
                }
            }
        }
    }
}

fn parse_desktop_file(path: &Path) -> Option<EntryItem> {
    let content = std::fs::read_to_string(path).ok()?;
    let entry = DesktopEntry::from_str(path, &content, Some(&["en"])).ok()?;

    if entry.no_display() || entry.hidden() {
        return None;
    }

    // Use empty locale list to get default (untranslated) values
    let locales: &[&str] = &[];

    let name = entry.name(locales)?.to_string();
    // Entries that cannot be launched are useless as results
    entry.exec()?;

    let stem = path.file_stem()?.to_string_lossy().to_string();
    let mut item = EntryItem::new(format!("{}://{}", SCHEME, stem), name);
    item.description = entry.comment(locales).map(|s| s.to_string());
    item.tags = entry
        .keywords(locales)
        .map(|kw| kw.iter().map(|s| s.to_lowercase()).collect())
        .unwrap_or_default();

    Some(item)
}

/// Build the app provider for the given directories.
pub fn app_provider(ctx: &ProviderContext, dirs_to_scan: Vec<PathBuf>) -> ListProvider {
    ListProvider::new(
        ProviderKind::App.name(),
        ProviderKind::App.load_step(),
        &[SCHEME],
        Arc::new(move || scan_applications(&dirs_to_scan)),
        Some(ctx.events.clone()),
    )
}
