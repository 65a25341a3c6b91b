//! Download of the backend's OpenAPI document.

use crate::error::{Error, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the backend publishes its OpenAPI document.
pub const SPEC_ENDPOINT: &str = "/api/openapi.json";

/// Snapshot location relative to the project root.
pub const SPEC_OUTPUT: &str = "build/openapi.json";

/// Pause before fetching so a freshly bound server finishes registering routes.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const OPERATION_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Informational facts about a fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSummary {
    pub title: String,
    pub version: String,
    /// Distinct path × method pairs.
    pub operations: usize,
}

impl SpecSummary {
    pub fn from_document(doc: &Value) -> Self {
        let info = doc.get("info");
        let text = |key: &str| {
            info.and_then(|i| i.get(key))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        let operations = doc
            .get("paths")
            .and_then(Value::as_object)
            .map(|paths| {
                paths
                    .values()
                    .filter_map(Value::as_object)
                    .map(|item| {
                        item.keys()
                            .filter(|k| OPERATION_METHODS.contains(&k.to_ascii_lowercase().as_str()))
                            .count()
                    })
                    .sum()
            })
            .unwrap_or(0);

        Self {
            title: text("title"),
            version: text("version"),
            operations,
        }
    }
}

pub struct SpecFetcher {
    client: reqwest::Client,
    url: String,
    output: PathBuf,
    settle: Duration,
}

impl SpecFetcher {
    pub fn new(backend_port: u16, project_root: &Path) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::debug!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            url: format!("http://localhost:{}{}", backend_port, SPEC_ENDPOINT),
            output: project_root.join(SPEC_OUTPUT),
            settle: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Fetch, validate and persist the document.
    ///
    /// The snapshot is replaced atomically and only when the body parses as
    /// JSON, so a failed fetch leaves the previous snapshot in place.
    pub async fn fetch(&self) -> Result<SpecSummary> {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        tracing::debug!("Fetching OpenAPI document from {}", self.url);
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::SpecStatus(status.as_u16()));
        }
        let body = resp.bytes().await?;
        let doc: Value = serde_json::from_slice(&body).map_err(Error::SpecInvalid)?;
        let summary = SpecSummary::from_document(&doc);

        let output = self.output.clone();
        tokio::task::spawn_blocking(move || write_atomically(&output, &body))
            .await
            .map_err(|e| Error::Process(format!("OpenAPI writer task failed: {}", e)))??;

        tracing::debug!(
            "OpenAPI: {} v{} ({} operations) -> {}",
            summary.title,
            summary.version,
            summary.operations,
            self.output.display()
        );
        Ok(summary)
    }
}

/// Write `contents` to `path` through a temp file in the same directory.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_counts_operations() {
        let doc = json!({
            "openapi": "3.1.0",
            "info": {"title": "My API", "version": "1.0.0"},
            "paths": {
                "/api/users": {"get": {}, "post": {}, "parameters": []},
                "/api/users/{id}": {"get": {}, "delete": {}, "summary": "x"},
                "/api/health": {"head": {}}
            }
        });
        let summary = SpecSummary::from_document(&doc);
        assert_eq!(summary.title, "My API");
        assert_eq!(summary.version, "1.0.0");
        assert_eq!(summary.operations, 5);
    }

    #[test]
    fn test_summary_tolerates_missing_fields() {
        let summary = SpecSummary::from_document(&json!([1, 2, 3]));
        assert_eq!(summary.title, "");
        assert_eq!(summary.operations, 0);
    }

    #[test]
    fn test_write_atomically_creates_dir_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build/openapi.json");
        write_atomically(&path, b"{\"a\":1}").unwrap();
        write_atomically(&path, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        assert_eq!(std::fs::read_dir(dir.path().join("build")).unwrap().count(), 1);
    }

    #[test]
    fn test_url_targets_backend_port() {
        let fetcher = SpecFetcher::new(3002, Path::new("/p"));
        assert_eq!(fetcher.url(), "http://localhost:3002/api/openapi.json");
        assert_eq!(fetcher.output_path(), Path::new("/p/build/openapi.json"));
    }
}
