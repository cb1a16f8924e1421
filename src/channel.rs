//! Channel-protocol collaborator.
//!
//! The crawler never speaks the channel wire protocol itself. It goes through
//! [`ChannelClient`], whose shipped implementation [`HttpChannelClient`]
//! talks JSON to a bridge process that owns the protocol session:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | session   | `GET /me` |
//! | probe     | `GET /channels/{identifier}` |
//! | enumerate | `GET /channels/{identifier}/messages?after={cursor}&limit={n}` |
//! | download  | `GET /channels/{identifier}/messages/{id}/media` |
//!
//! Without credentials the crawler gets a [`DisabledChannelClient`], for
//! which every operation reports [`ChannelError::Unavailable`].

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::{ChannelConfig, ChannelCredentials};
use crate::error::ChannelError;
use crate::models::{ChannelItem, ChannelMetadata, Domain};

/// Lazy, ascending, single-pass sequence of items.
pub type ItemStream<'a> = BoxStream<'a, Result<ChannelItem, ChannelError>>;

#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Identity of the logged-in session. Used as a startup connectivity check.
    async fn session(&self) -> Result<String, ChannelError>;

    /// Fetches the origin's full metadata; fails if the origin is unreachable.
    async fn probe(&self, domain: &Domain) -> Result<ChannelMetadata, ChannelError>;

    /// Items strictly after `after`, oldest first.
    fn enumerate<'a>(&'a self, domain: &'a Domain, after: i64) -> ItemStream<'a>;

    /// Writes the item's attached file to `target`, returning the byte count.
    async fn download(
        &self,
        domain: &Domain,
        item: &ChannelItem,
        target: &Path,
    ) -> Result<u64, ChannelError>;
}

/// Picks the bridge client when credentials are present, the disabled one otherwise.
pub fn build_channel_client(
    config: &ChannelConfig,
    credentials: Option<ChannelCredentials>,
) -> Result<Box<dyn ChannelClient>, ChannelError> {
    match credentials {
        Some(credentials) => Ok(Box::new(HttpChannelClient::new(config, credentials)?)),
        None => Ok(Box::new(DisabledChannelClient)),
    }
}

/// Stand-in used when credentials are missing.
pub struct DisabledChannelClient;

#[async_trait]
impl ChannelClient for DisabledChannelClient {
    async fn session(&self) -> Result<String, ChannelError> {
        Err(ChannelError::Unavailable)
    }

    async fn probe(&self, _domain: &Domain) -> Result<ChannelMetadata, ChannelError> {
        Err(ChannelError::Unavailable)
    }

    fn enumerate<'a>(&'a self, _domain: &'a Domain, _after: i64) -> ItemStream<'a> {
        stream::once(async { Err(ChannelError::Unavailable) }).boxed()
    }

    async fn download(
        &self,
        _domain: &Domain,
        _item: &ChannelItem,
        _target: &Path,
    ) -> Result<u64, ChannelError> {
        Err(ChannelError::Unavailable)
    }
}

/// JSON-over-HTTP client for the channel bridge.
pub struct HttpChannelClient {
    client: reqwest::Client,
    endpoint: Url,
    credentials: ChannelCredentials,
    page_size: u32,
    download_timeout: Duration,
}

#[derive(Deserialize)]
struct SessionResponse {
    username: Option<String>,
}

struct PageState {
    cursor: i64,
    buffer: VecDeque<ChannelItem>,
    exhausted: bool,
}

impl HttpChannelClient {
    pub fn new(
        config: &ChannelConfig,
        credentials: ChannelCredentials,
    ) -> Result<Self, ChannelError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ChannelError::Transport(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            credentials,
            page_size: config.page_size,
            download_timeout: config.download_timeout(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ChannelError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ChannelError::Transport(format!("endpoint cannot be a base: {}", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("X-Api-Id", &self.credentials.api_id)
            .header("X-Api-Hash", &self.credentials.api_hash)
            .header("X-Session", &self.credentials.phone_number)
    }

    async fn fetch_page(
        &self,
        domain: &Domain,
        after: i64,
    ) -> Result<Vec<ChannelItem>, ChannelError> {
        let identifier = domain.to_string();
        let url = self.url(&["channels", &identifier, "messages"])?;

        let response = self
            .get(url)
            .query(&[("after", after.to_string()), ("limit", self.page_size.to_string())])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let mut page: Vec<ChannelItem> = response.json().await?;
                page.sort_by_key(|item| item.id);
                Ok(page)
            }
            StatusCode::NOT_FOUND => Err(ChannelError::Unreachable(identifier)),
            status => Err(ChannelError::Transport(format!(
                "enumerate {} returned {}",
                identifier, status
            ))),
        }
    }
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn session(&self) -> Result<String, ChannelError> {
        let response = self.get(self.url(&["me"])?).send().await?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "session check returned {}",
                response.status()
            )));
        }

        let session: SessionResponse = response.json().await?;
        Ok(session.username.unwrap_or_else(|| "<unnamed>".to_string()))
    }

    async fn probe(&self, domain: &Domain) -> Result<ChannelMetadata, ChannelError> {
        let identifier = domain.to_string();
        let response = self.get(self.url(&["channels", &identifier])?).send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::FORBIDDEN => {
                Err(ChannelError::Unreachable(identifier))
            }
            status => Err(ChannelError::Transport(format!(
                "probe {} returned {}",
                identifier, status
            ))),
        }
    }

    fn enumerate<'a>(&'a self, domain: &'a Domain, after: i64) -> ItemStream<'a> {
        let page_size = self.page_size as usize;
        let state = PageState {
            cursor: after,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(state, move |mut state| async move {
            loop {
                if let Some(item) = state.buffer.pop_front() {
                    state.cursor = state.cursor.max(item.id);
                    return Some((Ok(item), state));
                }
                if state.exhausted {
                    return None;
                }

                match self.fetch_page(domain, state.cursor).await {
                    Ok(page) => {
                        state.exhausted = page.len() < page_size;
                        let cursor = state.cursor;
                        state.buffer = page.into_iter().filter(|item| item.id > cursor).collect();
                        // A full page that does not move past the cursor would loop forever
                        if state.buffer.is_empty() {
                            return None;
                        }
                    }
                    Err(e) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }

    async fn download(
        &self,
        domain: &Domain,
        item: &ChannelItem,
        target: &Path,
    ) -> Result<u64, ChannelError> {
        let identifier = domain.to_string();
        let item_id = item.id.to_string();
        let url = self.url(&["channels", &identifier, "messages", &item_id, "media"])?;

        // Overrides the client-wide timeout for this request only
        let response = self
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "download {}/{} returned {}",
                identifier,
                item.id,
                response.status()
            )));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(target, source))?;
        }
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|source| io_error(target, source))?;

        match write_body(response, &mut file, target).await {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(file);
                // No truncated files under the download root
                if let Err(cleanup) = tokio::fs::remove_file(target).await {
                    warn!(file = %target.display(), error = %cleanup, "Could not remove partial download");
                }
                Err(e)
            }
        }
    }
}

/// Streams the response body into `file` chunk by chunk.
async fn write_body(
    response: reqwest::Response,
    file: &mut tokio::fs::File,
    target: &Path,
) -> Result<u64, ChannelError> {
    let mut body = std::pin::pin!(response.bytes_stream());
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|source| io_error(target, source))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|source| io_error(target, source))?;

    Ok(written)
}

fn io_error(path: &Path, source: std::io::Error) -> ChannelError {
    ChannelError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> ChannelCredentials {
        ChannelCredentials {
            api_id: "1".into(),
            api_hash: "h".into(),
            phone_number: "+1".into(),
        }
    }

    #[test]
    fn urls_are_built_from_segments() {
        let config = ChannelConfig {
            endpoint: "http://bridge.local:8081/api/".into(),
            ..ChannelConfig::default()
        };
        let client = HttpChannelClient::new(&config, credentials()).unwrap();
        let url = client
            .url(&["channels", "-1001234567890", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://bridge.local:8081/api/channels/-1001234567890/messages"
        );
    }

    #[test]
    fn opaque_endpoint_cannot_build_urls() {
        let config = ChannelConfig {
            endpoint: "mailto:bridge@example.org".into(),
            ..ChannelConfig::default()
        };
        let client = HttpChannelClient::new(&config, credentials()).unwrap();
        match client.url(&["me"]) {
            Err(ChannelError::Transport(msg)) => {
                assert!(msg.contains("mailto:bridge@example.org"), "{}", msg)
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let config = ChannelConfig {
            endpoint: "not a url".into(),
            ..ChannelConfig::default()
        };
        assert!(matches!(
            HttpChannelClient::new(&config, credentials()),
            Err(ChannelError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_disable_every_operation() {
        let client = build_channel_client(&ChannelConfig::default(), None).unwrap();
        let domain = Domain::parse("alpha");

        assert!(matches!(
            client.session().await,
            Err(ChannelError::Unavailable)
        ));
        assert!(matches!(
            client.probe(&domain).await,
            Err(ChannelError::Unavailable)
        ));

        let items: Vec<_> = client.enumerate(&domain, 0).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ChannelError::Unavailable)));
    }
}
