// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Resolution of channel names to a stream address

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::config::RecorderConfig;

#[async_trait]
pub trait StreamDispatcher: Send + Sync {
    /// Return the key expression of a stream carrying `channels`
    async fn request_stream(&self, channels: &[String]) -> Result<String>;
}

/// Always answers with the configured stream
pub struct StaticDispatcher {
    key_expr: String,
}

impl StaticDispatcher {
    pub fn new(key_expr: impl Into<String>) -> Self {
        Self {
            key_expr: key_expr.into(),
        }
    }
}

#[async_trait]
impl StreamDispatcher for StaticDispatcher {
    async fn request_stream(&self, channels: &[String]) -> Result<String> {
        info!(
            "Using static stream '{}' for {} channels",
            self.key_expr,
            channels.len()
        );
        Ok(self.key_expr.clone())
    }
}

#[derive(Debug, Serialize)]
struct ChannelRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest<'a> {
    channels: Vec<ChannelRequest<'a>>,
    stream_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamReply {
    stream: String,
}

/// Asks a dispatcher service over HTTP for a dedicated stream
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StreamDispatcher for HttpDispatcher {
    async fn request_stream(&self, channels: &[String]) -> Result<String> {
        if channels.is_empty() {
            bail!("No channels to request a stream for");
        }

        let url = format!("{}/stream", self.base_url);
        let request = StreamRequest {
            channels: channels
                .iter()
                .map(|name| ChannelRequest { name })
                .collect(),
            stream_type: "pub_sub",
        };

        info!("Requesting stream for {} channels from {}", channels.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Dispatcher request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Dispatcher returned {}: {}", status, body));
        }

        let reply: StreamReply = response
            .json()
            .await
            .context("Invalid dispatcher reply")?;

        info!("Dispatcher assigned stream '{}'", reply.stream);
        Ok(reply.stream)
    }
}

/// HTTP dispatcher when a URL is configured, the static stream otherwise
pub fn from_config(config: &RecorderConfig) -> Result<Box<dyn StreamDispatcher>> {
    match &config.dispatcher.url {
        Some(url) => Ok(Box::new(HttpDispatcher::new(
            url.clone(),
            Duration::from_secs(config.dispatcher.timeout_seconds),
        )?)),
        None => Ok(Box::new(StaticDispatcher::new(
            config.stream.key_expr.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_static_dispatcher_returns_configured_stream() {
        let dispatcher = StaticDispatcher::new("bsread/test");
        let stream = dispatcher
            .request_stream(&["CH:A".to_string()])
            .await
            .unwrap();
        assert_eq!(stream, "bsread/test");
    }

    #[tokio::test]
    async fn test_http_dispatcher_posts_channels() {
        let router = Router::new().route(
            "/stream",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["streamType"], "pub_sub");
                let names: Vec<String> = body["channels"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|c| c["name"].as_str().unwrap().to_string())
                    .collect();
                Json(serde_json::json!({"stream": format!("bsread/{}", names.join("+"))}))
            }),
        );
        let url = serve(router).await;

        let dispatcher = HttpDispatcher::new(format!("{}/", url), Duration::from_secs(5)).unwrap();
        let stream = dispatcher
            .request_stream(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(stream, "bsread/A+B");
    }

    #[tokio::test]
    async fn test_http_dispatcher_rejects_empty_channel_list() {
        let dispatcher = HttpDispatcher::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(dispatcher.request_stream(&[]).await.is_err());
    }

    #[test]
    fn test_from_config_defaults_to_static() {
        let config = RecorderConfig::default();
        assert!(from_config(&config).is_ok());
    }
}
