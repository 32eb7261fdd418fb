//! Structured archive filenames
//!
//! Archived PDFs are named `<first author>_<year>_<title>.pdf`. Whatever
//! metadata is missing is left out, and with none at all the upload's
//! original filename is kept.

use crate::error::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_COMPONENT_CHARS: usize = 150;

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn underscore_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_+").expect("valid regex"))
}

/// Make `text` safe to use as part of a filename
pub fn sanitize_filename(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let replaced: String = text
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let replaced = whitespace_run().replace_all(&replaced, "_");
    let collapsed = underscore_run().replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    if trimmed.chars().count() > MAX_COMPONENT_CHARS {
        let truncated: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
        truncated.trim_end_matches('_').to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last name of an author written as "Last, First" or "First Last"
pub fn last_name(author: &str) -> Option<String> {
    let author = author.trim();
    let name = match author.split_once(',') {
        Some((last, _)) => last.trim(),
        None => author.split_whitespace().last().unwrap_or(""),
    };

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Build `<last name>_<year>_<title>.pdf`, or return `fallback_filename` when
/// no metadata is available
pub fn build_structured_archive_filename(
    first_author: Option<&str>,
    year: Option<i64>,
    title: Option<&str>,
    fallback_filename: &str,
) -> String {
    let mut parts = Vec::new();

    if let Some(name) = first_author.and_then(last_name) {
        parts.push(sanitize_filename(&name));
    }
    if let Some(year) = year.filter(|y| *y != 0) {
        parts.push(year.to_string());
    }
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        parts.push(sanitize_filename(title));
    }

    parts.retain(|p| !p.is_empty());
    if parts.is_empty() {
        return fallback_filename.to_string();
    }

    format!("{}.pdf", parts.join("_"))
}

/// Path in `archive_dir` for the structured name, suffixed `(1)`, `(2)`, ...
/// until it does not collide with an existing file.
///
/// `exclude` is the document's current archive path; landing on it is not a
/// collision.
pub fn get_unique_archive_path(
    archive_dir: &Path,
    original_filename: &str,
    first_author: Option<&str>,
    year: Option<i64>,
    title: Option<&str>,
    exclude: Option<&Path>,
) -> PathBuf {
    let target = build_structured_archive_filename(first_author, year, title, original_filename);
    let base = archive_dir.join(&target);

    let is_excluded = |path: &Path| exclude.map_or(false, |e| e == path);

    if is_excluded(&base) || !base.exists() {
        return base;
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let candidate = archive_dir.join(format!("{}({}){}", stem, counter, extension));
        if is_excluded(&candidate) || !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a document's archive file to its structured name.
///
/// Returns the new path, or `None` when there is no archive file or the name
/// is already correct.
pub fn rename_archive_for_document(
    archive_dir: &Path,
    archive_path: Option<&Path>,
    filename: &str,
    first_author: Option<&str>,
    year: Option<i64>,
    title: Option<&str>,
) -> Result<Option<PathBuf>> {
    let Some(current) = archive_path.filter(|p| p.exists()) else {
        return Ok(None);
    };

    let new_path = get_unique_archive_path(
        archive_dir,
        filename,
        first_author,
        year,
        title,
        Some(current),
    );
    if new_path == current {
        return Ok(None);
    }

    std::fs::create_dir_all(archive_dir)?;
    std::fs::rename(current, &new_path)?;
    info!(
        "Renamed archive file from {} to {}",
        current.display(),
        new_path.display()
    );

    Ok(Some(new_path))
}
