// Token renewal call

use reqwest::Client;

use super::types::{RefreshRequest, RefreshResponse};
use crate::config::join_url;
use crate::error::AuthError;

/// Result of a successful renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// POST the refresh token to the renewal endpoint
pub async fn renew(
    client: &Client,
    base_url: &str,
    refresh_endpoint: &str,
    refresh_token: &str,
) -> Result<RenewedTokens, AuthError> {
    let url = join_url(base_url, refresh_endpoint);
    tracing::info!(url = %url, "Renewing access token...");

    let request = RefreshRequest {
        refresh_token: refresh_token.to_string(),
    };

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| AuthError::RenewalFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %error_text, "Token renewal rejected");
        return Err(AuthError::RenewalRejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    let data: RefreshResponse = response
        .json()
        .await
        .map_err(|e| AuthError::MalformedRenewal(e.to_string()))?;

    let access_token = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AuthError::MalformedRenewal("response does not contain accessToken".to_string())
        })?;

    tracing::info!(
        rotated = data.refresh_token.is_some(),
        "Access token renewed"
    );

    Ok(RenewedTokens {
        access_token,
        refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
    })
}
