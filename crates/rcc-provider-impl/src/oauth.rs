//! OAuth2 device-flow machinery shared by the OAuth-capable adapters.
//!
//! Tokens are cached in memory per credential slot and persisted through the
//! [`TokenStore`] collaborator so an external credential store can survive
//! restarts. Refresh goes through the same `HttpTransport` as everything else.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, SystemTime};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use rcc_provider_core::{
    AdapterError, AdapterResult, AuthState, AuthStatus, HttpMethod, HttpRequest, HttpTransport,
    header_set,
};

const EXPIRY_LEEWAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl OAuthToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => SystemTime::now() + EXPIRY_LEEWAY >= at,
            None => false,
        }
    }
}

/// External credential store collaborator. Implementations must be cheap and
/// non-blocking; the in-memory store below is the default.
pub trait TokenStore: Send + Sync {
    fn load(&self, provider_id: &str, slot: usize) -> Option<OAuthToken>;
    fn save(&self, provider_id: &str, slot: usize, token: &OAuthToken);
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: StdRwLock<HashMap<(String, usize), OAuthToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, provider_id: &str, slot: usize, token: OAuthToken) {
        self.save(provider_id, slot, &token);
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, provider_id: &str, slot: usize) -> Option<OAuthToken> {
        self.tokens
            .read()
            .ok()?
            .get(&(provider_id.to_string(), slot))
            .cloned()
    }

    fn save(&self, provider_id: &str, slot: usize, token: &OAuthToken) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert((provider_id.to_string(), slot), token.clone());
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    pub client_id: String,
    pub token_url: String,
    pub device_code_url: String,
    pub scope: String,
}

/// Per-provider device-flow credential manager.
pub struct DeviceFlowAuth {
    provider_id: String,
    config: DeviceFlowConfig,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    tokens: RwLock<HashMap<usize, OAuthToken>>,
}

impl DeviceFlowAuth {
    pub fn new(
        provider_id: impl Into<String>,
        config: DeviceFlowConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            transport,
            store,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> AuthStatus {
        // Non-blocking snapshot; slot 0 is representative for health surfaces.
        let token = self
            .tokens
            .try_read()
            .ok()
            .and_then(|tokens| tokens.get(&0).cloned())
            .or_else(|| self.store.load(&self.provider_id, 0));
        match token {
            None => AuthStatus {
                state: AuthState::Expired,
                expires_at: None,
            },
            Some(token) => {
                let state = if token.is_expired() {
                    AuthState::Expired
                } else if matches!(
                    token.expires_at,
                    Some(at) if SystemTime::now() + Duration::from_secs(300) >= at
                ) {
                    AuthState::Expiring
                } else {
                    AuthState::Valid
                };
                AuthStatus {
                    state,
                    expires_at: token.expires_at,
                }
            }
        }
    }

    /// Current bearer token for a credential slot, refreshing once when the
    /// cached token has expired and a refresh token is on hand.
    pub async fn bearer(&self, slot: usize) -> AdapterResult<String> {
        if let Some(token) = self.cached(slot).await
            && !token.is_expired()
        {
            return Ok(token.access_token);
        }
        self.refresh(slot).await?;
        match self.cached(slot).await {
            Some(token) => Ok(token.access_token),
            None => Err(self.not_authorized()),
        }
    }

    pub async fn refresh(&self, slot: usize) -> AdapterResult<()> {
        let Some(current) = self.cached(slot).await else {
            return Err(self.not_authorized());
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(AdapterError::auth_expired(format!(
                "provider {:?} slot {slot}: no refresh token",
                self.provider_id
            )));
        };

        let form = serde_urlencoded::to_string([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ])
        .map_err(|err| AdapterError::decode(err.to_string()))?;

        let token = self.token_request(form).await?;
        // A missing rotated refresh token keeps the old one.
        let token = OAuthToken {
            refresh_token: token.refresh_token.or(Some(refresh_token)),
            ..token
        };
        self.remember(slot, token).await;
        tracing::debug!(provider = %self.provider_id, slot, "access token refreshed");
        Ok(())
    }

    /// Kick off the device-code grant. Returns the user-facing verification
    /// data; callers then drive [`DeviceFlowAuth::poll_device_token`].
    pub async fn begin_device_authorization(
        &self,
    ) -> AdapterResult<(DeviceAuthorization, String)> {
        let (verifier, challenge) = pkce_pair();
        let form = serde_urlencoded::to_string([
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ])
        .map_err(|err| AdapterError::decode(err.to_string()))?;

        let mut req = HttpRequest {
            method: HttpMethod::Post,
            url: self.config.device_code_url.clone(),
            headers: Vec::new(),
            body: Some(Bytes::from(form)),
        };
        header_set(&mut req.headers, "content-type", "application/x-www-form-urlencoded");
        header_set(&mut req.headers, "accept", "application/json");

        let resp = self.transport.send(req).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(AdapterError::from_status(resp.status, true, None, None));
        }
        let auth: DeviceAuthorization = serde_json::from_slice(&resp.body)
            .map_err(|err| AdapterError::decode(err.to_string()))?;
        Ok((auth, verifier))
    }

    /// Poll the token endpoint until the user approves, the code expires, or
    /// the grant is denied.
    pub async fn poll_device_token(
        &self,
        slot: usize,
        authorization: &DeviceAuthorization,
        verifier: &str,
    ) -> AdapterResult<()> {
        let mut interval = Duration::from_secs(authorization.interval.unwrap_or(5));
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(authorization.expires_in.unwrap_or(300).max(0) as u64);
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(AdapterError::auth_expired("device code expired"));
            }
            tokio::time::sleep(interval).await;

            let form = serde_urlencoded::to_string([
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", authorization.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("code_verifier", verifier),
            ])
            .map_err(|err| AdapterError::decode(err.to_string()))?;

            match self.token_request(form).await {
                Ok(token) => {
                    self.remember(slot, token).await;
                    return Ok(());
                }
                Err(err) => match err.provider_message.as_deref() {
                    Some("authorization_pending") => {}
                    Some("slow_down") => interval += Duration::from_secs(5),
                    _ => return Err(err),
                },
            }
        }
    }

    async fn token_request(&self, form: String) -> AdapterResult<OAuthToken> {
        let mut req = HttpRequest {
            method: HttpMethod::Post,
            url: self.config.token_url.clone(),
            headers: Vec::new(),
            body: Some(Bytes::from(form)),
        };
        header_set(&mut req.headers, "content-type", "application/x-www-form-urlencoded");
        header_set(&mut req.headers, "accept", "application/json");

        let resp = self.transport.send(req).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            let code = serde_json::from_slice::<TokenErrorResponse>(&resp.body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("token endpoint returned {}", resp.status));
            return Err(AdapterError::auth_expired(code).with_status(resp.status));
        }
        let token: TokenResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| AdapterError::decode(err.to_string()))?;
        Ok(OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| SystemTime::now() + Duration::from_secs(secs.max(0) as u64)),
        })
    }

    async fn cached(&self, slot: usize) -> Option<OAuthToken> {
        if let Some(token) = self.tokens.read().await.get(&slot).cloned() {
            return Some(token);
        }
        let token = self.store.load(&self.provider_id, slot)?;
        self.tokens.write().await.insert(slot, token.clone());
        Some(token)
    }

    async fn remember(&self, slot: usize, token: OAuthToken) {
        self.store.save(&self.provider_id, slot, &token);
        self.tokens.write().await.insert(slot, token);
    }

    fn not_authorized(&self) -> AdapterError {
        AdapterError::auth_expired(format!(
            "provider {:?} has no stored credentials; complete the device flow first",
            self.provider_id
        ))
    }
}

/// Static bearer keys or a device-flow manager, behind one face.
pub enum AuthSource {
    Static(Vec<String>),
    Device(DeviceFlowAuth),
}

impl AuthSource {
    pub fn is_oauth(&self) -> bool {
        matches!(self, AuthSource::Device(_))
    }

    pub async fn bearer(&self, slot: usize) -> AdapterResult<String> {
        match self {
            AuthSource::Static(keys) => keys
                .get(slot)
                .cloned()
                .ok_or_else(|| AdapterError::invalid_key_index(slot, keys.len())),
            AuthSource::Device(auth) => auth.bearer(slot).await,
        }
    }

    pub fn status(&self) -> AuthStatus {
        match self {
            AuthSource::Static(_) => AuthStatus::static_key(),
            AuthSource::Device(auth) => auth.status(),
        }
    }

    pub async fn refresh(&self, slot: usize) -> AdapterResult<()> {
        match self {
            AuthSource::Static(_) => Err(AdapterError::unsupported("auth refresh")),
            AuthSource::Device(auth) => auth.refresh(slot).await,
        }
    }
}

fn pkce_pair() -> (String, String) {
    let mut raw = [0u8; 48];
    rand::rng().fill_bytes(&mut raw);
    let verifier = URL_SAFE_NO_PAD.encode(raw);
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}
