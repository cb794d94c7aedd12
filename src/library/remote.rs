//! Remote library refresh
//!
//! Fetches a JSON directory listing, keeps the book files in it, downloads
//! any the device does not have yet and rewrites the catalog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::catalog::{display_name_from_filename, save_catalog, ContentItem};
use super::LibraryError;
use crate::config::LibraryConfig;

/// Characters of the content hash kept in the catalog
const HASH_PREFIX: usize = 8;

/// One entry of the remote directory listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(alias = "sha", default)]
    pub content_hash: String,
}

/// Result of one refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    /// The new catalog, in listing order
    pub items: Vec<ContentItem>,
    /// Books that were missing locally
    pub missing: usize,
    /// Books downloaded successfully
    pub added: usize,
}

impl RefreshSummary {
    pub fn found(&self) -> usize {
        self.items.len()
    }
}

/// Keep file entries with a recognised extension and a safe name
pub fn filter_listing(entries: Vec<ListingEntry>, extensions: &[String]) -> Vec<ContentItem> {
    entries
        .into_iter()
        .filter(|entry| entry.kind == "file")
        .filter(|entry| is_safe_name(&entry.name))
        .filter(|entry| has_extension(&entry.name, extensions))
        .filter_map(|entry| {
            let source_url = entry.download_url.filter(|url| !url.is_empty())?;
            Some(ContentItem {
                display_name: display_name_from_filename(&entry.name),
                content_hash: entry.content_hash.chars().take(HASH_PREFIX).collect(),
                id: entry.name,
                source_url,
                size: entry.size,
            })
        })
        .collect()
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Pulls the remote listing and missing books
pub struct LibraryUpdater {
    config: LibraryConfig,
    books_dir: PathBuf,
    catalog_path: PathBuf,
    http_client: reqwest::Client,
}

impl LibraryUpdater {
    pub fn new(config: LibraryConfig, books_dir: PathBuf, catalog_path: PathBuf) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            books_dir,
            catalog_path,
            http_client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.listing_url.is_some()
    }

    /// Fetch the listing, download what is missing and save the catalog
    pub async fn refresh(&self) -> Result<RefreshSummary, LibraryError> {
        let url = self
            .config
            .listing_url
            .as_deref()
            .ok_or(LibraryError::NotConfigured)?;

        let items = self.fetch_listing(url).await?;
        if items.is_empty() {
            return Err(LibraryError::EmptyListing);
        }
        info!(found = items.len(), "library listing fetched");

        let missing: Vec<&ContentItem> = items
            .iter()
            .filter(|item| !item.local_path(&self.books_dir).exists())
            .collect();

        let mut added = 0;
        for item in &missing {
            match self.download(item).await {
                Ok(bytes) => {
                    info!(id = %item.id, bytes, "book downloaded");
                    added += 1;
                }
                Err(e) => warn!(id = %item.id, error = %e, "book download failed"),
            }
        }

        save_catalog(&self.catalog_path, &items)?;

        Ok(RefreshSummary {
            missing: missing.len(),
            added,
            items,
        })
    }

    async fn fetch_listing(&self, url: &str) -> Result<Vec<ContentItem>, LibraryError> {
        debug!(url, "fetching library listing");
        let response = self
            .http_client
            .get(url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LibraryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Entries that are not objects are skipped rather than failing the
        // whole listing
        let raw: Vec<serde_json::Value> = response.json().await?;
        let entries = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();

        Ok(filter_listing(entries, &self.config.extensions))
    }

    async fn download(&self, item: &ContentItem) -> Result<usize, LibraryError> {
        let response = self
            .http_client
            .get(&item.source_url)
            .timeout(Duration::from_secs(self.config.download_timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LibraryError::Status {
                url: item.source_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        let target = item.local_path(&self.books_dir);
        write_atomically(&target, &body).await?;
        Ok(body.len())
    }
}

/// Write through a sibling temp file so a cut download never looks complete
async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), LibraryError> {
    let partial = target.with_extension("part");
    let io_err = |source| LibraryError::Io {
        path: target.to_owned(),
        source,
    };

    tokio::fs::write(&partial, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&partial, target).await.map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::load_catalog;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn entry(name: &str, kind: &str) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            download_url: Some(format!("https://books.example/raw/{}", name)),
            size: 10,
            content_hash: "0123456789abcdef".to_string(),
        }
    }

    fn extensions() -> Vec<String> {
        vec!["pdf".to_string(), "txt".to_string()]
    }

    #[test]
    fn test_filter_keeps_book_files_only() {
        let entries = vec![
            entry("masallar.pdf", "file"),
            entry("README.md", "file"),
            entry("archive", "dir"),
            entry("NOTES.TXT", "file"),
            entry("../escape.pdf", "file"),
            entry(".hidden.pdf", "file"),
            ListingEntry {
                download_url: None,
                ..entry("no_url.pdf", "file")
            },
        ];

        let items = filter_listing(entries, &extensions());
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["masallar.pdf", "NOTES.TXT"]);
        assert_eq!(items[0].display_name, "Masallar");
        assert_eq!(items[0].content_hash, "01234567");
    }

    #[test]
    fn test_listing_entry_accepts_sha_field() {
        let entry: ListingEntry = serde_json::from_str(
            r#"{"name":"a.pdf","type":"file","download_url":"http://x/a.pdf","size":3,"sha":"abc"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, "file");
        assert_eq!(entry.content_hash, "abc");
    }

    type Route = (String, u16, Vec<u8>);

    /// Serve fixed routes over plain HTTP until the test ends
    ///
    /// `routes` receives the server's base URL so listings can point back
    /// at it.
    async fn serve(routes: impl FnOnce(&str) -> Vec<Route>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes = routes(&base);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                    let (status, body) = routes
                        .iter()
                        .find(|(route, _, _)| *route == path)
                        .map(|(_, status, body)| (*status, body.clone()))
                        .unwrap_or((404, Vec::new()));

                    let head = format!(
                        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        base
    }

    fn config_for(base: &str) -> LibraryConfig {
        LibraryConfig {
            listing_url: Some(format!("{}/listing", base)),
            ..LibraryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_downloads_missing_books() {
        let dir = tempfile::tempdir().unwrap();
        let books = dir.path().join("books");
        std::fs::create_dir_all(&books).unwrap();
        std::fs::write(books.join("old.txt"), "already here").unwrap();

        let base = serve(|base| {
            let listing = format!(
                r#"[
                    {{"name":"old.txt","type":"file","download_url":"{base}/old.txt","size":12,"sha":"aaaa"}},
                    {{"name":"new.txt","type":"file","download_url":"{base}/new.txt","size":5,"sha":"bbbb"}},
                    {{"name":"gone.txt","type":"file","download_url":"{base}/gone.txt","size":5,"sha":"cccc"}},
                    {{"name":"docs","type":"dir"}},
                    "junk"
                ]"#
            );
            vec![
                ("/listing".to_string(), 200, listing.into_bytes()),
                ("/new.txt".to_string(), 200, b"fresh".to_vec()),
            ]
        })
        .await;

        let catalog = dir.path().join("catalog.json");
        let updater = LibraryUpdater::new(config_for(&base), books.clone(), catalog.clone());
        let summary = updater.refresh().await.unwrap();

        assert_eq!(summary.found(), 3);
        assert_eq!(summary.missing, 2);
        assert_eq!(summary.added, 1);
        assert_eq!(std::fs::read_to_string(books.join("new.txt")).unwrap(), "fresh");
        assert_eq!(std::fs::read_to_string(books.join("old.txt")).unwrap(), "already here");
        assert!(!books.join("gone.txt").exists());
        assert_eq!(load_catalog(&catalog), summary.items);
    }

    #[tokio::test]
    async fn test_refresh_reports_listing_failure() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(|_| vec![("/listing".to_string(), 500, Vec::new())]).await;

        let updater = LibraryUpdater::new(
            config_for(&base),
            dir.path().to_owned(),
            dir.path().join("catalog.json"),
        );
        let err = updater.refresh().await.unwrap_err();
        assert!(matches!(err, LibraryError::Status { status: 500, .. }));
        assert!(!dir.path().join("catalog.json").exists());
    }

    #[tokio::test]
    async fn test_refresh_requires_listing_url() {
        let dir = tempfile::tempdir().unwrap();
        let updater = LibraryUpdater::new(
            LibraryConfig::default(),
            dir.path().to_owned(),
            dir.path().join("catalog.json"),
        );
        assert!(!updater.is_configured());
        assert!(matches!(
            updater.refresh().await,
            Err(LibraryError::NotConfigured)
        ));
    }
}
