//! Thin proxy over the external identity provider. Session lifecycle is
//! entirely the provider's business; this service only forwards credentials
//! and relays the provider's responses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProviderSignInRequest {
    /// e.g. "google"
    pub provider: String,
    pub id_token: String,
}

/// Verbatim provider reply: status plus JSON body, relayed to the caller.
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn sign_in(&self, request: &SignInRequest) -> Result<ProviderResponse, String> {
        self.post("signin", request).await
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<ProviderResponse, String> {
        self.post("signup", request).await
    }

    pub async fn sign_in_with_provider(
        &self,
        request: &ProviderSignInRequest,
    ) -> Result<ProviderResponse, String> {
        self.post("oauth/signin", request).await
    }

    pub async fn sign_out(&self, session_token: &str) -> Result<ProviderResponse, String> {
        let url = format!("{}/signout", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::relay(response).await
    }

    pub async fn send_verification_email(
        &self,
        session_token: &str,
    ) -> Result<ProviderResponse, String> {
        let url = format!("{}/verification-email", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::relay(response).await
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<ProviderResponse, String> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::relay(response).await
    }

    async fn relay(response: reqwest::Response) -> Result<ProviderResponse, String> {
        let status = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok(ProviderResponse { status, body })
    }
}
