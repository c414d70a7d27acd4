//! FCM OAuth2 token exchange.
//!
//! An access token is minted by posting a signed JWT assertion to the
//! service account's token URI. The token is cached per profile with a
//! single in-flight exchange; refresh starts 3 minutes before expiry.
//! The assertion itself is never cached: every exchange attempt signs a
//! fresh one.

use crate::backoff::Backoff;
use crate::error::{DispatchError, Error};
use crate::profile::ServiceAccount;
use crate::sleeper::{Sleeper, TokioSleeper};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
const PRE_REFRESH: Duration = Duration::from_secs(180);
const EXCHANGE_ATTEMPTS: u32 = 4;
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Claims of the assertion JWT.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

/// Signs assertion claims into a compact JWT. Pluggable so tests and
/// KMS-backed deployments can replace the local RSA key.
pub trait AssertionSigner: Send + Sync + std::fmt::Debug {
    fn sign(&self, claims: &AssertionClaims) -> Result<String, DispatchError>;
}

/// RS256 signer over the service account's private key.
pub struct RsaSigner {
    key: jsonwebtoken::EncodingKey,
}

impl std::fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigner").finish_non_exhaustive()
    }
}

impl RsaSigner {
    pub fn from_pem(private_key_pem: &str) -> Result<Self, Error> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(Error::ServiceAccountKey)?;
        Ok(Self { key })
    }
}

impl AssertionSigner for RsaSigner {
    fn sign(&self, claims: &AssertionClaims) -> Result<String, DispatchError> {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        jsonwebtoken::encode(&header, claims, &self.key)
            .map_err(|err| DispatchError::TokenExchange(format!("assertion signing: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Per-profile token cache and exchanger.
pub struct TokenExchanger {
    account: ServiceAccount,
    client: reqwest::Client,
    signer: Arc<dyn AssertionSigner>,
    state: tokio::sync::Mutex<Option<CachedToken>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("client_email", &self.account.client_email)
            .field("token_uri", &self.account.token_uri)
            .finish()
    }
}

impl TokenExchanger {
    pub fn new(account: ServiceAccount, client: reqwest::Client) -> Result<Self, Error> {
        let signer = Arc::new(RsaSigner::from_pem(&account.private_key_pem)?);
        Ok(Self::with_signer(account, client, signer))
    }

    pub fn with_signer(
        account: ServiceAccount,
        client: reqwest::Client,
        signer: Arc<dyn AssertionSigner>,
    ) -> Self {
        Self {
            account,
            client,
            signer,
            state: tokio::sync::Mutex::new(None),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// The current access token, exchanging a fresh one when the cache
    /// is empty or within the pre-refresh window. The lock serializes
    /// exchanges so a profile never has two in flight.
    pub async fn access_token(&self) -> Result<String, DispatchError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if Instant::now() + PRE_REFRESH < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }
        let token = self.exchange().await?;
        let access_token = token.access_token.clone();
        *state = Some(token);
        Ok(access_token)
    }

    /// One exchange, retried on 500/503/408/429 and unprocessed
    /// requests with an exponential backoff.
    async fn exchange(&self) -> Result<CachedToken, DispatchError> {
        let backoff =
            Backoff::exponential(Duration::from_millis(500), Duration::from_secs(8), 2.0);
        let mut attempt = 1u32;
        loop {
            match self.exchange_once().await {
                Ok(token) => return Ok(token),
                Err((error, retryable)) => {
                    if !retryable || attempt >= EXCHANGE_ATTEMPTS {
                        return Err(error);
                    }
                    let delay = backoff.delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %error,
                        "token exchange failed, retrying");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn exchange_once(&self) -> Result<CachedToken, (DispatchError, bool)> {
        // Signed fresh on every attempt.
        let assertion = self.build_assertion().map_err(|err| (err, false))?;

        let started = Instant::now();
        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|err| {
                let unprocessed = err.is_connect();
                (DispatchError::from_transport(err), unprocessed)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retryable = matches!(status.as_u16(), 500 | 503 | 408 | 429);
            return Err((
                DispatchError::TokenExchange(format!("token endpoint returned {status}")),
                retryable,
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| (DispatchError::TokenExchange(format!("token response: {err}")), false))?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            expires_in = token.expires_in,
            "exchanged FCM access token"
        );
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    fn build_assertion(&self) -> Result<String, DispatchError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = AssertionClaims {
            iss: self.account.client_email.clone(),
            scope: FIREBASE_MESSAGING_SCOPE.to_string(),
            aud: self.account.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs(),
        };
        self.signer.sign(&claims)
    }

    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }
}
