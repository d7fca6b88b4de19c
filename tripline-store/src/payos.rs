use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};
use tripline_core::payment::{
    GatewayError, PaymentGateway, PaymentLink, PaymentLinkRequest, GATEWAY_SUCCESS_CODE,
};
use tripline_core::signature;

use crate::app_config::GatewayConfig;

const RETRY_BASE_DELAY_MS: u64 = 200;

/// Hosted-checkout client. Only transport failures are retried; the
/// gateway deduplicates by `orderCode`, so a resent request is harmless.
pub struct PayosGateway {
    client: Client,
    base_url: String,
    client_id: String,
    api_key: String,
    checksum_key: String,
    max_retries: u32,
}

impl PayosGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Transport { attempts: 0, message: e.to_string() })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
            checksum_key: config.checksum_key.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn send(&self, request: &PaymentLinkRequest) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/v2/payment-requests", self.base_url);
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let sent = self
                .client
                .post(&url)
                .header("x-client-id", &self.client_id)
                .header("x-api-key", &self.api_key)
                .json(request)
                .send()
                .await;

            match sent {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(attempt, order_code = request.order_code, error = %e, "payment link request failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay(attempt)).await;
                    }
                }
            }
        }

        Err(GatewayError::Transport { attempts, message: last_error })
    }
}

/// Linear backoff between transport retries.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS * u64::from(attempt))
}

#[async_trait]
impl PaymentGateway for PayosGateway {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        request.reconcile()?;

        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), order_code = request.order_code, "gateway rejected payment link");
            return Err(GatewayError::HttpStatus { status: status.as_u16(), body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        parse_link_response(&body, &self.checksum_key)
    }
}

/// Check the envelope code and the signature over `data`, then decode it.
pub fn parse_link_response(body: &Value, checksum_key: &str) -> Result<PaymentLink, GatewayError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    if code != GATEWAY_SUCCESS_CODE {
        let desc = body.get("desc").and_then(Value::as_str).unwrap_or_default();
        return Err(GatewayError::Declined { code: code.to_string(), desc: desc.to_string() });
    }

    let verification = signature::verify(body, checksum_key);
    if !verification.ok {
        warn!(data = %verification.data, "payment link response signature mismatch");
        return Err(GatewayError::Malformed("response signature mismatch".into()));
    }

    let link: PaymentLink = serde_json::from_value(verification.data)
        .map_err(|e| GatewayError::Malformed(e.to_string()))?;
    debug!(order_code = link.order_code, payment_link_id = %link.payment_link_id, "payment link created");
    Ok(link)
}
