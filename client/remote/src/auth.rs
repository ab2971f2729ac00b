//! # Identity provider
//!
//! Google sign-in goes through the hosted identity service with the PKCE flow:
//!
//! 1. The client generates a random verifier and sends its S256 challenge in the authorize url.
//! 2. The user signs in with Google in the browser and is redirected back with a one-time `code`.
//! 3. The client exchanges `code` + verifier for a session (access token, refresh token, user).
//!
//! The session is owned by the caller, this module never persists anything.
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{
    error::RemoteError,
    models::{Session, User},
};

const VERIFIER_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

/// Change notifications delivered to subscribers of the auth store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();

        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);

        Self {
            verifier,
            challenge,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        challenge: &str,
    ) -> Result<String, RemoteError>;

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, RemoteError>;

    /// The user behind `access_token`, `None` if the token is no longer accepted.
    async fn get_user(&self, access_token: &str) -> Result<Option<User>, RemoteError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), RemoteError>;
}

pub struct GoTrueClient {
    http: Client,
    auth_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl GoTrueClient {
    pub fn new(http: Client, project_url: &str, anon_key: &str) -> Self {
        Self {
            http,
            auth_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        challenge: &str,
    ) -> Result<String, RemoteError> {
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.auth_url),
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| RemoteError::Malformed(format!("authorize url: {e}")))?;

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, RemoteError> {
        let response = self
            .http
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "pkce")])
            .header("apikey", &self.anon_key)
            .json(&json!({ "auth_code": code, "code_verifier": verifier }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let token: TokenResponse = response.json().await?;

        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_at,
            user: token.user,
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<User>, RemoteError> {
        let response = self
            .http
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(RemoteError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        // An already revoked token is as good as signed out.
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            return Ok(());
        }

        Err(RemoteError::Status {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_known_vector() {
        // RFC 7636 appendix B
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_generate() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), VERIFIER_LEN);
        assert_ne!(pkce, Pkce::generate());
    }

    #[test]
    fn test_authorize_url() {
        let client = GoTrueClient::new(Client::new(), "https://abc.supabase.co", "anon");
        let url = client
            .authorize_url(OAuthProvider::Google, "http://127.0.0.1:54321/callback", "xyz")
            .unwrap();

        assert!(url.starts_with("https://abc.supabase.co/auth/v1/authorize?provider=google"));
        assert!(url.contains("redirect_to=http%3A%2F%2F127.0.0.1%3A54321%2Fcallback"));
        assert!(url.contains("code_challenge=xyz"));
    }
}
