//! WhatsApp gateway channel
//!
//! HTTP client for the messaging gateway's REST API. The account-to-instance
//! lookup is cached with a short TTL so a burst of matches does not hammer
//! the gateway.

use super::{ChannelError, SendResult, WhatsappChannel};
use crate::config::WhatsappGatewayConfig;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const INSTANCE_CACHE_TTL_SECS: u64 = 300;
const INSTANCE_CACHE_CAPACITY: u64 = 100;

/// WhatsApp channel backed by an HTTP messaging gateway
pub struct GatewayWhatsappChannel {
    client: Client,
    base_url: String,
    api_key: String,
    /// account_id -> connected instance id; `None` cached too so repeated
    /// lookups for an unlinked account stay cheap
    instance_cache: Cache<i64, Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
struct SendTextRequest {
    number: String,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstanceResponse {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    connected: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayErrorResponse {
    #[serde(default)]
    message: String,
}

impl GatewayWhatsappChannel {
    /// Create a gateway client from configuration
    pub fn new(config: &WhatsappGatewayConfig) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChannelError::Gateway(format!("HTTP client: {}", e)))?;

        let instance_cache = Cache::builder()
            .max_capacity(INSTANCE_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(INSTANCE_CACHE_TTL_SECS))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            instance_cache,
        })
    }

    async fn fetch_instance(&self, account_id: i64) -> Result<Option<String>, ChannelError> {
        let response = self
            .client
            .get(format!("{}/instance/by-account/{}", self.base_url, account_id))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| ChannelError::Gateway(format!("Instance lookup failed: {}", e)))?;

        // 404 means the account never connected a device
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        let body: InstanceResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Gateway(format!("Invalid instance response: {}", e)))?;

        if body.connected {
            Ok(body.instance_id)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl WhatsappChannel for GatewayWhatsappChannel {
    async fn connected_instance(&self, account_id: i64) -> Result<Option<String>, ChannelError> {
        if let Some(cached) = self.instance_cache.get(&account_id).await {
            return Ok(cached);
        }

        let instance = self.fetch_instance(account_id).await?;
        self.instance_cache.insert(account_id, instance.clone()).await;
        Ok(instance)
    }

    async fn send(&self, instance_id: &str, to_number: &str, text: &str) -> SendResult {
        let number = super::normalize_number(to_number);
        if number.is_empty() {
            return Err(ChannelError::InvalidRecipient(format!(
                "No digits in number: {}",
                to_number
            )));
        }

        let response = self
            .client
            .post(format!("{}/message/send-text/{}", self.base_url, instance_id))
            .header("apikey", &self.api_key)
            .json(&SendTextRequest {
                number,
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| ChannelError::Gateway(format!("Send request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(gateway_error(response).await);
        }

        log::debug!("WhatsApp message sent via instance {}", instance_id);
        Ok(())
    }
}

/// Convert a non-success gateway response into a ChannelError
async fn gateway_error(response: reqwest::Response) -> ChannelError {
    let status = response.status();
    let message = response
        .json::<GatewayErrorResponse>()
        .await
        .map(|e| e.message)
        .unwrap_or_default();

    if message.is_empty() {
        ChannelError::Gateway(format!("Gateway returned {}", status))
    } else {
        ChannelError::Gateway(format!("{}: {}", status, message))
    }
}
