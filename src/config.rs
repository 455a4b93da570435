use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::Error;

/// Runtime configuration for the auth core.
///
/// In production this is a JSON document written by infrastructure at deploy
/// time and served next to the application; each field falls back
/// independently to a `COSTLENS_*` environment variable for local
/// development. `redirect_uri` and `auth_bypass` come from the environment
/// only — the deploy document never carries them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub cognito_domain: String,
    pub cognito_client_id: String,
    pub user_pool_id: String,
    pub identity_pool_id: String,
    pub aws_region: String,
    pub data_bucket_name: String,
    #[serde(skip)]
    pub redirect_uri: String,
    #[serde(skip)]
    pub auth_bypass: bool,
}

impl AppConfig {
    /// Build a configuration entirely from `COSTLENS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().merged_with(env_lookup)
    }

    /// Fill every empty field from the given lookup (single field miss leaves
    /// that field empty rather than failing the whole load).
    fn merged_with(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        let fill = |field: &mut String, var: &str| {
            if field.is_empty() {
                if let Some(v) = get(var) {
                    *field = v;
                }
            }
        };
        fill(&mut self.cognito_domain, "COSTLENS_COGNITO_DOMAIN");
        fill(&mut self.cognito_client_id, "COSTLENS_COGNITO_CLIENT_ID");
        fill(&mut self.user_pool_id, "COSTLENS_USER_POOL_ID");
        fill(&mut self.identity_pool_id, "COSTLENS_IDENTITY_POOL_ID");
        fill(&mut self.aws_region, "COSTLENS_AWS_REGION");
        fill(&mut self.data_bucket_name, "COSTLENS_DATA_BUCKET_NAME");
        fill(&mut self.redirect_uri, "COSTLENS_REDIRECT_URI");

        self.auth_bypass = matches!(
            get("COSTLENS_AUTH_BYPASS").as_deref(),
            Some("1") | Some("true")
        );
        self
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Once-only loader for [`AppConfig`].
///
/// `load()` is idempotent and safe under concurrent first callers: the
/// runtime document is fetched exactly once per process, and every caller
/// observes the same fully-built configuration. A failed fetch degrades to
/// the environment fallback with a warning rather than blocking startup —
/// the shell must always be able to render a sign-in prompt.
pub struct ConfigLoader {
    config_url: Url,
    http: reqwest::Client,
    cell: OnceCell<AppConfig>,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(config_url: Url) -> Self {
        Self {
            config_url,
            http: reqwest::Client::new(),
            cell: OnceCell::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Load the configuration, fetching the runtime document on first call.
    pub async fn load(&self) -> &AppConfig {
        self.cell
            .get_or_init(|| async {
                match self.fetch().await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(error = %e, "runtime config fetch failed, using environment fallback");
                        AppConfig::from_env()
                    }
                }
            })
            .await
    }

    async fn fetch(&self) -> Result<AppConfig, Error> {
        let response = self.http.get(self.config_url.clone()).send().await?;
        let response = response.error_for_status()?;
        let config: AppConfig = response.json().await?;
        Ok(config.merged_with(env_lookup))
    }
}
