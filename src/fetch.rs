use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::Result;

const USER_AGENT_STRING: &str = "pagewatch/1.0";

/// Extracted text is only trusted above this length; shorter extractions
/// are usually error pages or bot walls.
const MIN_CONTENT_LENGTH: usize = 200;

pub struct FetchedContent {
    pub html: Option<String>,
    pub text: String,
}

/// Swappable content source. `Ok(None)` means the fetch failed in an
/// expected way (HTTP error, unusable content); the caller skips the
/// cycle. No retries happen at this layer.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedContent>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT_STRING)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Extract readable content from HTML using html2text
    fn extract_content(&self, html: &str) -> Option<String> {
        let text = match html2text::from_read(html.as_bytes(), 80) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Failed to convert HTML to text: {}", e);
                return None;
            }
        };

        // Clean up the text - remove excessive whitespace
        let cleaned: String = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if cleaned.len() >= MIN_CONTENT_LENGTH {
            Some(cleaned)
        } else {
            tracing::debug!("Extracted content too short ({} chars)", cleaned.len());
            None
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedContent>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", url, response.status());
            return Ok(None);
        }

        let html = response.text().await?;

        let Some(text) = self.extract_content(&html) else {
            return Ok(None);
        };

        Ok(Some(FetchedContent {
            html: Some(html),
            text,
        }))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_rejects_short_content() {
        let fetcher = HttpFetcher::new();
        assert!(fetcher.extract_content("<html><body>hi</body></html>").is_none());
    }

    #[test]
    fn extraction_cleans_whitespace() {
        let body: String = (0..40)
            .map(|i| format!("<p>  paragraph number {i} with some text  </p>"))
            .collect();
        let html = format!("<html><body>{body}</body></html>");
        let fetcher = HttpFetcher::new();
        let text = fetcher.extract_content(&html).expect("long enough");
        assert!(text.contains("paragraph number 0"));
        assert!(!text.lines().any(|l| l.is_empty()));
        assert!(!text.lines().any(|l| l != l.trim()));
    }
}
