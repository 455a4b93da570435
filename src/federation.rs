use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::AwsCredentials;
use crate::error::Error;

/// Login map for the federation exchange, keyed by issuer
/// (`cognito-idp.{region}.amazonaws.com/{user_pool_id}` → identity token).
pub type LoginMap = HashMap<String, String>;

/// Builds the single-entry login map for a user-pool identity token.
#[must_use]
pub fn login_map(aws_region: &str, user_pool_id: &str, id_token: &str) -> LoginMap {
    let mut logins = LoginMap::new();
    logins.insert(
        format!("cognito-idp.{aws_region}.amazonaws.com/{user_pool_id}"),
        id_token.to_string(),
    );
    logins
}

/// The two-step identity-federation protocol: resolve an identity handle for
/// a trusted identity token, then exchange it for temporary credentials.
///
/// [`crate::CredentialCache`] drives this seam; production hosts use
/// [`CognitoIdentityBroker`], tests substitute a counting fake.
pub trait IdentityBroker: Send + Sync + 'static {
    /// Resolve the opaque identity handle for the given pool and logins.
    fn resolve_identity(
        &self,
        identity_pool_id: &str,
        logins: &LoginMap,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    /// Exchange a resolved identity handle for temporary credentials.
    fn credentials_for_identity(
        &self,
        identity_id: &str,
        logins: &LoginMap,
    ) -> impl Future<Output = Result<AwsCredentials, Error>> + Send;
}

/// Cognito Identity client for the unsigned enhanced flow
/// (`GetId` + `GetCredentialsForIdentity`, `x-amz-json-1.1` protocol).
pub struct CognitoIdentityBroker {
    endpoint: Url,
    http: reqwest::Client,
}

const GET_ID_TARGET: &str = "AWSCognitoIdentityService.GetId";
const GET_CREDENTIALS_TARGET: &str = "AWSCognitoIdentityService.GetCredentialsForIdentity";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdRequest<'a> {
    identity_pool_id: &'a str,
    logins: &'a LoginMap,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdResponse {
    #[serde(default)]
    identity_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsRequest<'a> {
    identity_id: &'a str,
    logins: &'a LoginMap,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsResponse {
    #[serde(default)]
    credentials: Option<WireCredentials>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCredentials {
    #[serde(default)]
    access_key_id: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    session_token: Option<String>,
    /// Epoch seconds, fractional.
    #[serde(default)]
    expiration: Option<f64>,
}

impl CognitoIdentityBroker {
    /// Create a broker for the regional Cognito Identity endpoint.
    #[must_use]
    pub fn new(aws_region: &str) -> Self {
        let endpoint = format!("https://cognito-identity.{aws_region}.amazonaws.com/")
            .parse()
            .expect("valid regional endpoint URL");
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    /// Override the service endpoint (for testing).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn call<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        target: &'static str,
        operation: &'static str,
        body: &B,
    ) -> Result<R, Error> {
        let payload = serde_json::to_vec(body).map_err(|e| Error::Federation {
            operation,
            detail: format!("encode request: {e}"),
        })?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", AMZ_JSON)
            .header("x-amz-target", target)
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Federation {
                operation,
                detail: format!("status {status}: {detail}"),
            });
        }

        response.json::<R>().await.map_err(Into::into)
    }
}

impl IdentityBroker for CognitoIdentityBroker {
    async fn resolve_identity(
        &self,
        identity_pool_id: &str,
        logins: &LoginMap,
    ) -> Result<String, Error> {
        let request = GetIdRequest {
            identity_pool_id,
            logins,
        };
        let response: GetIdResponse = self.call(GET_ID_TARGET, "GetId", &request).await?;
        response.identity_id.ok_or(Error::Federation {
            operation: "GetId",
            detail: "response carried no IdentityId".to_string(),
        })
    }

    async fn credentials_for_identity(
        &self,
        identity_id: &str,
        logins: &LoginMap,
    ) -> Result<AwsCredentials, Error> {
        let request = GetCredentialsRequest {
            identity_id,
            logins,
        };
        let response: GetCredentialsResponse = self
            .call(GET_CREDENTIALS_TARGET, "GetCredentialsForIdentity", &request)
            .await?;

        let incomplete = |field: &str| Error::Federation {
            operation: "GetCredentialsForIdentity",
            detail: format!("incomplete credentials: missing {field}"),
        };
        let wire = response.credentials.ok_or_else(|| incomplete("Credentials"))?;
        let expiration_secs = wire.expiration.ok_or_else(|| incomplete("Expiration"))?;

        Ok(AwsCredentials {
            access_key_id: wire.access_key_id.ok_or_else(|| incomplete("AccessKeyId"))?,
            secret_access_key: wire.secret_key.ok_or_else(|| incomplete("SecretKey"))?,
            session_token: wire.session_token.ok_or_else(|| incomplete("SessionToken"))?,
            expiration: (expiration_secs * 1000.0) as i64,
        })
    }
}
