//! HTTP client for the member payment endpoints, used by the payment
//! dialog and the `cooperative-pay` binary.

use async_trait::async_trait;
use cookie::Cookie;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::auth::SESSION_COOKIE;
use crate::error::{AppError, Result};
use crate::payments::protocol::{
    ApiEnvelope, CheckStatusRequest, InitiatePaymentRequest, InitiatedPayment, OutstandingFees,
    PaymentStatusView,
};

/// The two calls a payment dialog makes.
#[async_trait]
pub trait PaymentApi: Send + Sync {
    async fn initiate(&self, request: &InitiatePaymentRequest) -> Result<ApiEnvelope<InitiatedPayment>>;
    async fn check_status(&self, reference_id: &str) -> Result<ApiEnvelope<PaymentStatusView>>;
}

pub struct HttpPaymentApi {
    http: Client,
    base_url: String,
    session_token: String,
}

impl HttpPaymentApi {
    pub fn new(base_url: impl Into<String>, session_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: session_token.into(),
        })
    }

    /// Logs in with member credentials and keeps the session cookie.
    pub async fn login(base_url: &str, email: &str, password: &str) -> Result<Self> {
        let http = build_client()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{}/auth/login", base_url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(AppError::External(format!("login failed with HTTP {}", response.status())));
        }

        let session_token = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value.to_string()).ok())
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or_else(|| AppError::External("login response carried no session cookie".to_string()))?;

        debug!(base_url = %base_url, "logged in");
        Ok(Self { http, base_url, session_token })
    }

    pub async fn outstanding_fees(&self) -> Result<OutstandingFees> {
        let envelope: ApiEnvelope<OutstandingFees> =
            read_envelope(self.authorized(self.http.get(self.url("/member/fees/outstanding"))).send().await?)
                .await?;

        match envelope.data {
            Some(fees) if envelope.success => Ok(fees),
            _ => Err(AppError::External(envelope.message)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, self.session_token))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiEnvelope<T>> {
        let response = self.authorized(self.http.post(self.url(path)).json(body)).send().await?;
        read_envelope(response).await
    }
}

#[async_trait]
impl PaymentApi for HttpPaymentApi {
    async fn initiate(&self, request: &InitiatePaymentRequest) -> Result<ApiEnvelope<InitiatedPayment>> {
        self.post_json("/member/payments/initiate", request).await
    }

    async fn check_status(&self, reference_id: &str) -> Result<ApiEnvelope<PaymentStatusView>> {
        let body = CheckStatusRequest { reference_id: reference_id.to_string() };
        self.post_json("/member/payments/check-status", &body).await
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to initialize HTTP client: {}", e)))
}

/// Error responses carry the same envelope, so it is parsed whatever the
/// status code. Anything else becomes an error.
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<ApiEnvelope<T>> {
    let status = response.status();
    let body = response.text().await?;

    match serde_json::from_str::<ApiEnvelope<T>>(&body) {
        Ok(envelope) => Ok(envelope),
        Err(_) if status == StatusCode::UNAUTHORIZED => Err(AppError::Unauthorized),
        Err(e) if status.is_success() => Err(AppError::External(format!("unexpected response body: {}", e))),
        Err(_) => Err(AppError::External(format!("HTTP {}", status))),
    }
}
