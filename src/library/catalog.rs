//! Book catalog and its on-disk form

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::LibraryError;

/// Longest spoken book name
const DISPLAY_NAME_LIMIT: usize = 40;

/// Short connective words left in lower case inside a title
const CONNECTIVES: [&str; 5] = ["ve", "ile", "de", "da", "ki"];

/// One book the device can play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Remote file name; also the local file name and the progress key
    pub id: String,
    pub display_name: String,
    pub source_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_hash: String,
}

impl ContentItem {
    pub fn local_path(&self, books_dir: &Path) -> PathBuf {
        books_dir.join(&self.id)
    }
}

/// Turn `kucuk_prens-ve_tilki.pdf` into `Kucuk Prens ve Tilki`
pub fn display_name_from_filename(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains(' ') => stem,
        _ => filename,
    };

    let spaced: String = stem
        .chars()
        .map(|c| if matches!(c, '_' | '-' | '.') { ' ' } else { c })
        .collect();

    let words: Vec<String> = spaced
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            if CONNECTIVES.contains(&lower.as_str()) {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => lower,
            }
        })
        .collect();

    words.join(" ").chars().take(DISPLAY_NAME_LIMIT).collect::<String>().trim_end().to_string()
}

/// Read the catalog; missing or unreadable files give an empty list
pub fn load_catalog(path: &Path) -> Vec<ContentItem> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(error = %e, path = ?path, "catalog unreadable");
            return Vec::new();
        }
    };

    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(error = %e, path = ?path, "catalog corrupt");
        Vec::new()
    })
}

pub fn save_catalog(path: &Path, items: &[ContentItem]) -> Result<(), LibraryError> {
    let json = serde_json::to_string_pretty(items)?;
    fs::write(path, json).map_err(|source| LibraryError::Io {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            display_name: display_name_from_filename(id),
            source_url: format!("https://books.example/{}", id),
            size: 1024,
            content_hash: "3f2a9c1e".to_string(),
        }
    }

    #[test]
    fn test_display_name_from_filename() {
        assert_eq!(
            display_name_from_filename("kucuk_prens-ve_tilki.pdf"),
            "Kucuk Prens ve Tilki"
        );
        assert_eq!(display_name_from_filename("SEFILLER.PDF"), "Sefiller");
        assert_eq!(display_name_from_filename("notes.v2.txt"), "Notes V2");
        assert_eq!(display_name_from_filename("özet_dersi.pdf"), "Özet Dersi");
    }

    #[test]
    fn test_display_name_is_capped() {
        let name = display_name_from_filename(
            "a_very_long_book_title_that_goes_on_and_on_and_on.pdf",
        );
        assert!(name.chars().count() <= 40);
        assert!(name.starts_with("A Very Long Book"));
        assert!(!name.ends_with(' '));
    }

    #[test]
    fn test_catalog_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let items = vec![item("b.pdf"), item("a.txt")];

        save_catalog(&path, &items).unwrap();
        assert_eq!(load_catalog(&path), items);
    }

    #[test]
    fn test_corrupt_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, "[{").unwrap();
        assert!(load_catalog(&path).is_empty());
        assert!(load_catalog(&dir.path().join("missing.json")).is_empty());
    }

    #[test]
    fn test_local_path() {
        let books = Path::new("/data/books");
        assert_eq!(item("x.pdf").local_path(books), PathBuf::from("/data/books/x.pdf"));
    }
}
