use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MomoConfig;
use crate::domain::ProviderStatus;
use crate::payments::gateway::{CollectionRequest, GatewayError, PaymentGateway, ProviderTransaction};

const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Tokens are refreshed this long before the provider says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPayStatus {
    status: String,
    #[serde(default)]
    financial_transaction_id: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    reason: Option<JsonValue>,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Client for an MTN MoMo style collection API.
pub struct MomoGateway {
    http: Client,
    config: MomoConfig,
    subscription_key: String,
    api_user: String,
    api_key: String,
    token: Mutex<Option<AccessToken>>,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> Result<Self, GatewayError> {
        let subscription_key = required(&config.subscription_key, "momo.subscription_key")?;
        let api_user = required(&config.api_user, "momo.api_user")?;
        let api_key = required(&config.api_key, "momo.api_key")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            subscription_key,
            api_user,
            api_key,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(self.endpoint("/collection/token/"))
            .basic_auth(&self.api_user, Some(&self.api_key))
            .header(SUBSCRIPTION_HEADER, &self.subscription_key)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!("HTTP {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = token.expires_in, "obtained momo access token");

        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch_status(&self, reference_id: &str) -> Result<ProviderTransaction, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .get(self.endpoint(&format!("/collection/v1_0/requesttopay/{}", reference_id)))
            .bearer_auth(token)
            .header(SUBSCRIPTION_HEADER, &self.subscription_key)
            .header("X-Target-Environment", &self.config.target_environment)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: RequestToPayStatus = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

                Ok(ProviderTransaction {
                    reference_id: body.external_id.unwrap_or_else(|| reference_id.to_string()),
                    status: ProviderStatus::parse(&body.status),
                    reason: body.reason.map(describe_reason),
                    financial_transaction_id: body.financial_transaction_id,
                })
            }
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(reference_id.to_string())),
            StatusCode::UNAUTHORIZED => {
                self.forget_token().await;
                Err(GatewayError::Auth("access token rejected".to_string()))
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(GatewayError::Rejected { status: status.as_u16(), message })
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn name(&self) -> &str {
        "momo"
    }

    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError> {
        let msisdn = normalize_msisdn(&request.payer_phone, &self.config.country_code)?;
        let token = self.access_token().await?;

        // externalId carries our reference so callbacks can be matched
        // even when the provider omits the X-Reference-Id.
        let payload = json!({
            "amount": request.amount.normalize().to_string(),
            "currency": request.currency,
            "externalId": request.reference_id,
            "payer": {
                "partyIdType": "MSISDN",
                "partyId": msisdn,
            },
            "payerMessage": request.payer_message,
            "payeeNote": request.payee_note,
        });

        let mut builder = self
            .http
            .post(self.endpoint("/collection/v1_0/requesttopay"))
            .bearer_auth(token)
            .header(SUBSCRIPTION_HEADER, &self.subscription_key)
            .header("X-Reference-Id", &request.reference_id)
            .header("X-Target-Environment", &self.config.target_environment)
            .json(&payload);

        if let Some(callback_url) = &self.config.callback_url {
            builder = builder.header("X-Callback-Url", callback_url);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(reference_id = %request.reference_id, "momo collection requested");
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }

        let message = response.text().await.unwrap_or_default();
        warn!(reference_id = %request.reference_id, status = %status, "momo rejected collection request");
        Err(GatewayError::Rejected { status: status.as_u16(), message })
    }

    async fn transaction_status(&self, reference_id: &str) -> Result<ProviderTransaction, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.fetch_status(reference_id).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    warn!(reference_id, attempt = attempt + 1, error = %e, "momo status check failed, retrying");
                    tokio::time::sleep(Duration::from_millis(250 << attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String, GatewayError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Auth(format!("{} is not configured", key)))
}

pub(crate) fn describe_reason(reason: JsonValue) -> String {
    match reason {
        JsonValue::String(s) => s,
        JsonValue::Object(map) => map
            .get("message")
            .or_else(|| map.get("code"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| JsonValue::Object(map).to_string()),
        other => other.to_string(),
    }
}

/// Converts a locally typed phone number into the international MSISDN
/// form the provider expects: `0788 123 456` becomes `250788123456`.
pub fn normalize_msisdn(phone: &str, country_code: &str) -> Result<String, GatewayError> {
    let digits: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::InvalidPhone(format!("'{}' is not a phone number", phone)));
    }

    let msisdn = if let Some(local) = digits.strip_prefix('0') {
        format!("{}{}", country_code, local)
    } else {
        digits.to_string()
    };

    if msisdn.len() < 9 || msisdn.len() > 15 {
        return Err(GatewayError::InvalidPhone(format!("'{}' has the wrong length", phone)));
    }

    Ok(msisdn)
}
