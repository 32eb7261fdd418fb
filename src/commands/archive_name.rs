//! Archive-name command implementation

use crate::archive::build_structured_archive_filename;
use serde::Serialize;

/// Structured archive filename for the given metadata
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveName {
    pub filename: String,
    pub structured: bool,
}

/// Compute the archive filename without touching the filesystem
pub fn cmd_archive_name(
    first_author: Option<&str>,
    year: Option<i64>,
    title: Option<&str>,
    fallback_filename: &str,
) -> ArchiveName {
    let filename = build_structured_archive_filename(first_author, year, title, fallback_filename);
    ArchiveName {
        structured: filename != fallback_filename,
        filename,
    }
}

pub fn print_archive_name(name: &ArchiveName) {
    println!("{}", name.filename);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name() {
        let name = cmd_archive_name(Some("Ada Lovelace"), Some(1843), Some("Notes"), "notes.pdf");
        assert_eq!(name.filename, "Lovelace_1843_Notes.pdf");
        assert!(name.structured);

        let fallback = cmd_archive_name(None, None, None, "notes.pdf");
        assert_eq!(fallback.filename, "notes.pdf");
        assert!(!fallback.structured);
    }
}
