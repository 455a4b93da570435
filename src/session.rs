use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use crate::config::AppConfig;
use crate::credentials::CredentialScope;
use crate::pkce;
use crate::store::{SessionStore, keys};
use crate::token;

/// Sentinel access token returned in bypass mode.
pub const BYPASS_TOKEN: &str = "bypass-token";

/// Host-shell control of the page location.
///
/// The OAuth2 flow needs full-page navigation (authorize and logout are
/// redirect endpoints) and a history-replace to strip the authorization code
/// from the visible URL. A wasm host backs this with `window.location` /
/// `window.history`; tests use a recording fake.
pub trait Navigator: Send + Sync + 'static {
    /// Full-page navigation to `url`.
    fn navigate(&self, url: &Url);

    /// Full page reload.
    fn reload(&self);

    /// The document's current URL.
    fn current_url(&self) -> Url;

    /// Replace the visible URL without reloading.
    fn replace_url(&self, url: &Url);
}

/// Token response from the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    id_token: String,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Auth session manager: owns the Authorization-Code+PKCE lifecycle and
/// exposes a boolean/token query surface to the rest of the application.
///
/// Constructed by the composition root from an already-loaded [`AppConfig`]
/// (see [`crate::ConfigLoader`]), so no operation can run against
/// partially-initialized configuration.
///
/// Failure semantics: session operations degrade — a failed exchange or a
/// malformed token yields `false`/`None`, never an error — so the shell can
/// always fall back to rendering a sign-in prompt.
pub struct AuthSession<S, N> {
    config: AppConfig,
    http: reqwest::Client,
    store: Arc<S>,
    navigator: Arc<N>,
    credentials: Option<Arc<dyn CredentialScope>>,
}

impl<S: SessionStore, N: Navigator> AuthSession<S, N> {
    #[must_use]
    pub fn new(config: AppConfig, store: Arc<S>, navigator: Arc<N>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            store,
            navigator,
            credentials: None,
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Register the credential cache to invalidate on logout.
    #[must_use]
    pub fn with_credential_scope(mut self, scope: Arc<dyn CredentialScope>) -> Self {
        self.credentials = Some(scope);
        self
    }

    /// Whether a currently-valid identity token is in session storage.
    ///
    /// Always true in bypass mode. Any malformed or expired token is `false`,
    /// never an error.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        if self.config.auth_bypass {
            return true;
        }
        match self.store.get(keys::ID_TOKEN) {
            Some(id_token) => token::is_current(&id_token, OffsetDateTime::now_utc()),
            None => false,
        }
    }

    /// Start a login attempt: store a fresh PKCE verifier and navigate to the
    /// provider's authorize endpoint. No-op in bypass mode or when no
    /// provider domain is configured.
    pub fn login(&self) {
        if self.config.auth_bypass {
            return;
        }
        let Some(mut authorize_url) = self.provider_endpoint("/oauth2/authorize") else {
            tracing::warn!("login without a configured provider domain");
            return;
        };

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        self.store.set(keys::PKCE_VERIFIER, &verifier);

        authorize_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.cognito_client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", "openid email profile")
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        self.navigator.navigate(&authorize_url);
    }

    /// Complete the return trip from the provider: exchange the `code` query
    /// parameter for tokens and persist them.
    ///
    /// `true` only when tokens were obtained and stored. Missing code,
    /// missing stored verifier, and failed exchanges all resolve to `false`;
    /// the verifier is consumed only after a successful exchange.
    pub async fn handle_callback(&self) -> bool {
        if self.config.auth_bypass {
            return true;
        }

        let current = self.navigator.current_url();
        let Some(code) = query_param(&current, "code") else {
            return false;
        };
        let Some(verifier) = self.store.get(keys::PKCE_VERIFIER) else {
            tracing::warn!("callback carried a code but no PKCE verifier was stored");
            return false;
        };
        let Some(token_url) = self.provider_endpoint("/oauth2/token") else {
            tracing::warn!("callback without a configured provider domain");
            return false;
        };

        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.cognito_client_id.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];

        let response = match self.http.post(token_url).form(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "token exchange request failed");
                return false;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "token exchange rejected");
            return false;
        }
        let tokens: TokenResponse = match response.json().await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "token response malformed");
                return false;
            }
        };

        self.store.set(keys::ID_TOKEN, &tokens.id_token);
        self.store.set(keys::ACCESS_TOKEN, &tokens.access_token);
        if let Some(refresh_token) = &tokens.refresh_token {
            self.store.set(keys::REFRESH_TOKEN, refresh_token);
        }
        self.store.remove(keys::PKCE_VERIFIER);

        // Strip the authorization code from the visible URL.
        let mut stripped = current;
        stripped.set_query(None);
        self.navigator.replace_url(&stripped);

        tracing::info!("login successful");
        true
    }

    /// End the session: invalidate derived credentials, drop stored tokens,
    /// best-effort revoke the refresh token, and navigate to the provider's
    /// logout endpoint (or reload when bypassed/unconfigured).
    pub async fn logout(&self) {
        if let Some(credentials) = &self.credentials {
            credentials.clear();
        }

        let refresh_token = self.store.get(keys::REFRESH_TOKEN);
        self.store.remove(keys::ID_TOKEN);
        self.store.remove(keys::ACCESS_TOKEN);
        self.store.remove(keys::REFRESH_TOKEN);

        let logout_url = if self.config.auth_bypass {
            None
        } else {
            self.provider_endpoint("/logout")
        };
        let Some(mut logout_url) = logout_url else {
            self.navigator.reload();
            return;
        };

        if let Some(refresh_token) = refresh_token {
            self.revoke_refresh_token(&refresh_token).await;
        }

        logout_url
            .query_pairs_mut()
            .append_pair("client_id", &self.config.cognito_client_id)
            .append_pair("logout_uri", &self.config.redirect_uri);

        tracing::info!("logout");
        self.navigator.navigate(&logout_url);
    }

    /// The stored access token, or the fixed sentinel in bypass mode.
    ///
    /// Passthrough only — no freshness check. Callers needing guaranteed
    /// freshness go back through the normal session flow.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        if self.config.auth_bypass {
            return Some(BYPASS_TOKEN.to_string());
        }
        self.store.get(keys::ACCESS_TOKEN)
    }

    /// Best-effort token revocation: failure must not block the redirect.
    async fn revoke_refresh_token(&self, refresh_token: &str) {
        let Some(revoke_url) = self.provider_endpoint("/oauth2/revoke") else {
            return;
        };
        let params = [
            ("client_id", self.config.cognito_client_id.as_str()),
            ("token", refresh_token),
        ];
        match self.http.post(revoke_url).form(&params).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "refresh token revocation rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh token revocation failed");
            }
        }
    }

    fn provider_endpoint(&self, path: &str) -> Option<Url> {
        if self.config.cognito_domain.is_empty() {
            return None;
        }
        let base = self.config.cognito_domain.trim_end_matches('/');
        format!("{base}{path}").parse().ok()
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
