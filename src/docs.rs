//! Documentation lookup for the `Docs` corrective action.
//!
//! Uses the Context7 API when `CONTEXT7_API_KEY` is set. Without a credential
//! there is simply no lookup; that is a normal "no context" outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::DocsConfig;

/// Tokens of documentation requested per lookup.
const DOCS_TOKEN_BUDGET: u32 = 2000;

/// External documentation-lookup service.
#[async_trait]
pub trait DocsLookup: Send + Sync {
    /// Look up documentation relevant to `query`.
    ///
    /// `Ok(None)` means the service had nothing for this query.
    async fn lookup(&self, cancel: &CancellationToken, query: &str)
        -> anyhow::Result<Option<String>>;
}

/// Context7 search response.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<LibraryHit>,
}

#[derive(Debug, Deserialize)]
struct LibraryHit {
    id: String,
    #[serde(default)]
    title: String,
}

/// HTTP client for the Context7 documentation API.
pub struct Context7Docs {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Context7Docs {
    /// Build a client from config, or `None` when no credential is configured.
    pub fn from_config(config: &DocsConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Some(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }))
    }

    async fn search_library(&self, query: &str) -> anyhow::Result<Option<LibraryHit>> {
        let url = format!(
            "{}/search?query={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Context7 search error ({}): {}", status, error_text);
        }

        let search: SearchResponse = response.json().await?;
        Ok(search.results.into_iter().next())
    }

    async fn fetch_docs(&self, library: &LibraryHit, topic: &str) -> anyhow::Result<String> {
        let url = format!(
            "{}/{}?type=txt&tokens={}&topic={}",
            self.base_url,
            library.id.trim_start_matches('/'),
            DOCS_TOKEN_BUDGET,
            urlencoding::encode(topic)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Context7 docs error ({}): {}", status, error_text);
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl DocsLookup for Context7Docs {
    async fn lookup(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> anyhow::Result<Option<String>> {
        let work = async {
            let Some(library) = self.search_library(query).await? else {
                return Ok(None);
            };
            tracing::debug!(library = %library.id, title = %library.title, "Context7 library matched");
            let docs = self.fetch_docs(&library, query).await?;
            Ok::<_, anyhow::Error>(Some(docs).filter(|d| !d.trim().is_empty()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("documentation lookup cancelled"),
            result = work => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_credential_means_no_client() {
        let config = DocsConfig::default();
        assert!(Context7Docs::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = DocsConfig {
            api_key: Some("ctx7-key".to_string()),
            base_url: "https://docs.example.com/api/".to_string(),
        };
        let client = Context7Docs::from_config(&config).unwrap().unwrap();
        assert_eq!(client.base_url, "https://docs.example.com/api");
    }

    #[test]
    fn search_response_tolerates_missing_fields() {
        let parsed: SearchResponse =
            serde_json::from_str(r#"{"results": [{"id": "/tokio-rs/tokio"}]}"#).unwrap();
        assert_eq!(parsed.results[0].id, "/tokio-rs/tokio");
        assert!(parsed.results[0].title.is_empty());

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }
}
