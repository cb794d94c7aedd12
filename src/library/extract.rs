//! Flat text from book files

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LibraryConfig;
use crate::process::run_with_timeout;

/// Turns a local book file into one line of plain text
pub trait TextExtractor: Send + Sync {
    /// Whitespace-collapsed text, or an empty string when nothing could
    /// be read
    fn extract(&self, path: &Path) -> String;
}

/// Reads `.txt` files directly and converts everything else with an
/// external `pdftotext`-compatible program
pub struct CommandExtractor {
    program: String,
    timeout: Duration,
    scratch_dir: PathBuf,
    next_id: AtomicU64,
}

impl CommandExtractor {
    pub fn new(config: &LibraryConfig, scratch_dir: PathBuf) -> Self {
        Self {
            program: config.extractor.clone(),
            timeout: Duration::from_secs(config.extraction_timeout_secs),
            scratch_dir,
            next_id: AtomicU64::new(0),
        }
    }

    fn convert(&self, path: &Path) -> Option<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let scratch = self
            .scratch_dir
            .join(format!("extract-{}-{}.txt", std::process::id(), id));

        let mut command = Command::new(&self.program);
        command
            .args(["-layout", "-enc", "UTF-8"])
            .arg(path)
            .arg(&scratch);

        let converted = run_with_timeout(command, None, self.timeout);
        let text = fs::read(&scratch).ok();
        let _ = fs::remove_file(&scratch);

        if let Err(e) = converted {
            warn!(error = %e, path = ?path, "text extraction failed");
            return None;
        }
        text.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl TextExtractor for CommandExtractor {
    fn extract(&self, path: &Path) -> String {
        if !path.is_file() {
            warn!(path = ?path, "book file missing");
            return String::new();
        }

        let is_plain = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        let raw = if is_plain {
            fs::read(path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| warn!(error = %e, path = ?path, "failed to read book"))
                .ok()
        } else {
            self.convert(path)
        };

        let text = raw
            .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        debug!(path = ?path, chars = text.chars().count(), "text extracted");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(dir: &Path, program: &str) -> CommandExtractor {
        let config = LibraryConfig {
            extractor: program.to_string(),
            extraction_timeout_secs: 5,
            ..LibraryConfig::default()
        };
        CommandExtractor::new(&config, dir.to_owned())
    }

    #[test]
    fn test_plain_text_is_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("tale.TXT");
        fs::write(&book, "Once upon\n\n  a   time.\t").unwrap();

        let text = extractor(dir.path(), "unused").extract(&book);
        assert_eq!(text, "Once upon a time.");
    }

    #[test]
    fn test_missing_file_gives_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let text = extractor(dir.path(), "unused").extract(&dir.path().join("nope.pdf"));
        assert!(text.is_empty());
    }

    #[test]
    fn test_missing_converter_gives_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book.pdf");
        fs::write(&book, b"%PDF-1.4").unwrap();

        let text = extractor(dir.path(), "/nonexistent/pdftotext").extract(&book);
        assert!(text.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_converter_output_is_read_and_removed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book.pdf");
        fs::write(&book, b"%PDF-1.4").unwrap();

        // last argument is the output file
        let fake = dir.path().join("fake-pdftotext");
        fs::write(
            &fake,
            "#!/bin/sh\nfor last; do :; done\nprintf 'Page one\\n\\n  page   two' > \"$last\"\n",
        )
        .unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let config = LibraryConfig {
            extractor: fake.to_string_lossy().into_owned(),
            ..LibraryConfig::default()
        };
        let text = CommandExtractor::new(&config, scratch.clone()).extract(&book);

        assert_eq!(text, "Page one page two");
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
