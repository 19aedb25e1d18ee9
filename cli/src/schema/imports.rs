//! Import discovery and remote fetching for schema documents.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::constants::IMPORT_FETCH_TIMEOUT;

/// Matches `import "x.proto";`, `import public "x.proto";` and `import weak "x.proto";`.
#[expect(clippy::unwrap_used, reason = "constant pattern, covered by tests")]
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s+(?:(?:public|weak)\s+)?"([^"]+)""#).unwrap());

/// Quoted import paths in `source`, in order of appearance, without duplicates.
///
/// This is a textual scan. Imports inside comments are reported too and
/// resolved like any other import.
pub fn extract_imports(source: &str) -> Vec<String> {
    let mut imports: Vec<String> = Vec::new();
    for caps in IMPORT_RE.captures_iter(source) {
        let path = caps[1].to_string();
        if !imports.contains(&path) {
            imports.push(path);
        }
    }
    imports
}

/// Source of schema documents that were imported but not supplied.
#[async_trait]
pub trait ImportFetcher: Send + Sync {
    /// Fetch the document declared as `import "<path>"`.
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// Fetches imports over HTTP from `base_url + path`.
///
/// The default base points at the protobuf repository so well-known types
/// (`google/protobuf/*.proto`) resolve without being uploaded.
#[derive(Debug, Clone)]
pub struct HttpImportFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImportFetcher {
    /// Create a fetcher rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(IMPORT_FETCH_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    /// URL an import path is fetched from.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ImportFetcher for HttpImportFetcher {
    async fn fetch(&self, path: &str) -> Result<String> {
        let url = self.url_for(path);
        log::info!("[Schema] Fetching import {} from {}", path, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("failed to fetch {url}: {status}");
        }
        response
            .text()
            .await
            .with_context(|| format!("failed to read body of {url}"))
    }
}
