//! Bearer-token issuance against the Sber OAuth endpoint.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::SpeechError;

/// A freshly issued bearer token. `expires_at` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: i64,
}

/// Issues bearer tokens for a `(credential, scope)` pair.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, auth_key: &str, scope: &str) -> Result<IssuedToken, SpeechError>;
}

/// Client for the OAuth token endpoint.
///
/// Each request carries a fresh `RqUID`, a basic-auth credential, and the
/// requested scope as a form field.
pub struct OauthClient {
    http: reqwest::Client,
    url: String,
}

impl OauthClient {
    pub fn new(url: String, danger_accept_invalid_certs: bool) -> Result<Self, SpeechError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(danger_accept_invalid_certs)
            .build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl TokenIssuer for OauthClient {
    async fn issue(&self, auth_key: &str, scope: &str) -> Result<IssuedToken, SpeechError> {
        let rq_uid = Uuid::new_v4().to_string();
        debug!(%scope, %rq_uid, "requesting token");
        let response = self
            .http
            .post(&self.url)
            .header("RqUID", rq_uid)
            .header(AUTHORIZATION, format!("Basic {auth_key}"))
            .header(ACCEPT, "application/json")
            .form(&[("scope", scope)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::Credential(format!(
                "issuer returned {status}"
            )));
        }
        parse_issuance(&response.text().await?)
    }
}

#[derive(Debug, Deserialize)]
struct IssuanceResponse {
    access_token: Option<String>,
    expires_at: Option<i64>,
}

/// A well-formed response carries both the token value and its expiry;
/// anything less is a credential error and must not overwrite stored state.
fn parse_issuance(body: &str) -> Result<IssuedToken, SpeechError> {
    let decoded: IssuanceResponse = serde_json::from_str(body)
        .map_err(|e| SpeechError::Credential(format!("undecodable issuer response: {e}")))?;
    match (decoded.access_token, decoded.expires_at) {
        (Some(value), Some(expires_at)) => Ok(IssuedToken { value, expires_at }),
        _ => Err(SpeechError::Credential(
            "issuer response is missing access_token or expires_at".into(),
        )),
    }
}
