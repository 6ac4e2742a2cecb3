//! Telegram Bot API transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use feedrelay_common::types::Destination;

use crate::sender::{MessageTransport, TransportError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

/// Posts `sendMessage` calls with HTML parse mode.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramClient {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(api_base: impl Into<String>, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, credential: &str) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, credential)
    }
}

#[async_trait]
impl MessageTransport for TelegramClient {
    async fn deliver(
        &self,
        credential: &str,
        destination: &Destination,
        text: &str,
    ) -> Result<(), TransportError> {
        let request = SendMessageRequest {
            chat_id: destination.chat_id,
            text,
            parse_mode: "HTML",
            message_thread_id: destination.thread_id,
        };

        // Errors carry the request URL, which embeds the bot token.
        let response = self
            .client
            .post(self.endpoint(credential))
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Retryable(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Retryable(e.without_url().to_string()))?;
        let parsed = serde_json::from_str::<ApiResponse>(&body).ok();
        let reason = |fallback: String| {
            parsed
                .as_ref()
                .and_then(|r| r.description.clone())
                .unwrap_or(fallback)
        };

        if status == StatusCode::BAD_REQUEST {
            return Err(TransportError::Permanent(reason(status.to_string())));
        }
        if !status.is_success() {
            return Err(TransportError::Retryable(reason(status.to_string())));
        }

        match &parsed {
            Some(r) if r.ok => Ok(()),
            Some(r) if r.error_code == Some(400) => {
                Err(TransportError::Permanent(reason("Bad Request".to_string())))
            }
            Some(r) => Err(TransportError::Retryable(reason(format!(
                "error_code {}",
                r.error_code.unwrap_or_default()
            )))),
            None => Err(TransportError::Retryable(
                "undecodable API response".to_string(),
            )),
        }
    }
}
