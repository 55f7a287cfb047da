//! Token endpoint calls: authorization_code and refresh_token grants

use serde::Deserialize;
use std::time::Duration;

use super::token::TokenRecord;
use crate::error::{OAuthError, Result};
use crate::provider::{ProviderConfig, TokenRequestFormat};
use crate::utils::truncate_for_display;

/// Longest response body snippet carried in a network error
const MAX_ERROR_BODY: usize = 240;

/// OAuth response from token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error response from token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Authorization-code grant parameters
#[derive(Debug, Clone)]
pub struct CodeGrant<'a> {
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub code_verifier: Option<&'a str>,
}

/// Refresh-token grant parameters
#[derive(Debug, Clone)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
    pub client_id: Option<&'a str>,
    pub client_secret: Option<&'a str>,
}

/// HTTP client for provider token endpoints
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http_client: reqwest::Client,
}

impl TokenExchanger {
    /// Create an exchanger whose requests time out after `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    /// Redeem an authorization code
    ///
    /// `now` (epoch millis) anchors `expires_in`.
    pub async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        grant: &CodeGrant<'_>,
        now: u64,
    ) -> Result<TokenRecord> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", grant.code),
            ("redirect_uri", grant.redirect_uri),
            ("client_id", grant.client_id),
        ];
        if let Some(verifier) = grant.code_verifier {
            params.push(("code_verifier", verifier));
        }
        if let Some(secret) = grant.client_secret {
            params.push(("client_secret", secret));
        }

        let response = self.post(provider, &params).await?;
        let mut record = into_record(response, now);
        record.client_id = Some(grant.client_id.to_string());
        record.client_secret = grant.client_secret.map(str::to_string);
        Ok(record)
    }

    /// Obtain a new access token with a refresh token
    ///
    /// The returned record keeps `grant.refresh_token` when the provider does
    /// not rotate it.
    pub async fn refresh(
        &self,
        provider: &ProviderConfig,
        grant: &RefreshGrant<'_>,
        now: u64,
    ) -> Result<TokenRecord> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", grant.refresh_token),
        ];
        if let Some(client_id) = grant.client_id {
            params.push(("client_id", client_id));
        }
        if let Some(secret) = grant.client_secret {
            params.push(("client_secret", secret));
        }

        let response = self.post(provider, &params).await?;
        let mut record = into_record(response, now);
        if record.refresh_token.is_none() {
            record.refresh_token = Some(grant.refresh_token.to_string());
        }
        record.client_id = grant.client_id.map(str::to_string);
        record.client_secret = grant.client_secret.map(str::to_string);
        Ok(record)
    }

    async fn post(
        &self,
        provider: &ProviderConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let request = self
            .http_client
            .post(&provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json");
        let request = match provider.token_request_format {
            TokenRequestFormat::Form => request.form(params),
            TokenRequestFormat::Json => {
                let body: serde_json::Map<String, serde_json::Value> = params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
                    .collect();
                request.json(&body)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorResponse>(&response_text) {
                Ok(error) => match error.error_description {
                    Some(description) => format!("{}: {description}", error.error),
                    None => error.error,
                },
                Err(_) => truncate_for_display(&response_text, MAX_ERROR_BODY),
            };
            tracing::warn!(
                provider = %provider.name,
                status = status.as_u16(),
                "Token endpoint rejected request: {message}"
            );
            return Err(OAuthError::network(Some(status.as_u16()), message));
        }

        // Some providers (GitHub) report grant errors with a 200
        if let Ok(error) = serde_json::from_str::<ErrorResponse>(&response_text) {
            let message = error.error_description.unwrap_or(error.error);
            return Err(OAuthError::network(Some(status.as_u16()), message));
        }

        serde_json::from_str(&response_text).map_err(|e| {
            OAuthError::network(
                Some(status.as_u16()),
                format!(
                    "failed to parse token response: {e} - Response: {}",
                    truncate_for_display(&response_text, MAX_ERROR_BODY)
                ),
            )
        })
    }
}

fn into_record(response: TokenResponse, now: u64) -> TokenRecord {
    TokenRecord {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        token_type: response
            .token_type
            .map(|t| normalize_token_type(&t))
            .unwrap_or_else(|| "Bearer".to_string()),
        expires_at: response
            .expires_in
            .map(|seconds| now.saturating_add(seconds.saturating_mul(1000))),
        scope: response.scope,
        client_id: None,
        client_secret: None,
    }
}

/// Providers disagree on casing ("bearer" vs "Bearer"); headers want "Bearer"
fn normalize_token_type(token_type: &str) -> String {
    if token_type.eq_ignore_ascii_case("bearer") {
        "Bearer".to_string()
    } else {
        token_type.to_string()
    }
}
