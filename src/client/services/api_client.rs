//! Typed HTTP wrapper over the backend REST boundary.
//!
//! The bearer token is read from the injected [`TokenStore`] on every call,
//! so a login/impersonate/logout between two requests is visible to the
//! second request. No retries, no timeout: transport failures propagate
//! immediately to the caller.

use crate::client::utils::token_store::{TokenSlot, TokenStore};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status with the server-supplied `detail` message.
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> Arc<dyn TokenStore> {
        self.tokens.clone()
    }

    fn url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        format!("{base}/{endpoint}")
    }

    /// Derive the websocket endpoint for `endpoint` from the API base URL
    /// (`http` becomes `ws`, `https` becomes `wss`).
    pub fn ws_endpoint(&self, endpoint: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.url(endpoint))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot derive ws scheme from {}", self.base_url))?;
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.load(TokenSlot::Session) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body
                }
            });
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.authorize(self.http.get(self.url(endpoint))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .authorize(self.http.post(self.url(endpoint)).json(body))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// POST with no body, decoding the JSON response.
    pub async fn post_no_body<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.authorize(self.http.post(self.url(endpoint))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// POST with no body, discarding the response payload. Used by the
    /// heartbeat and the fire-and-forget mark-read calls.
    pub async fn post_unit(&self, endpoint: &str) -> Result<()> {
        let response = self.authorize(self.http.post(self.url(endpoint))).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// POST an `application/x-www-form-urlencoded` body (the OAuth2 password
    /// form). The JSON content type is deliberately not set here.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .authorize(self.http.post(self.url(endpoint)).form(form))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// POST a multipart form (file uploads). reqwest sets the multipart
    /// boundary content type itself; the JSON content type is never applied.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let response = self
            .authorize(self.http.post(self.url(endpoint)).multipart(form))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .authorize(self.http.put(self.url(endpoint)).json(body))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// PUT with no body, decoding the JSON response.
    pub async fn put_no_body<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.authorize(self.http.put(self.url(endpoint))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self
            .authorize(self.http.delete(self.url(endpoint)))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
