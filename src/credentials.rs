use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::error::Error;
use crate::federation::{self, IdentityBroker};
use crate::store::{SessionStore, keys};

/// Refresh credentials this long before they actually expire.
pub const REFRESH_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Temporary AWS credentials from the identity-pool exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Absolute expiration instant, epoch milliseconds.
    pub expiration: i64,
}

type SharedExchange = Shared<BoxFuture<'static, Result<AwsCredentials, Arc<Error>>>>;

#[derive(Default)]
struct CacheState {
    cached: Option<AwsCredentials>,
    identity_id: Option<String>,
    in_flight: Option<SharedExchange>,
}

/// Clears credential state derived from the current session.
///
/// Object-safe handle so [`crate::AuthSession::logout`] can invalidate the
/// cache without knowing its broker/store type parameters.
pub trait CredentialScope: Send + Sync {
    fn clear(&self);
}

/// Caching, auto-refreshing source of temporary AWS credentials.
///
/// Derives credentials from the identity token in session storage via the
/// two-step federation exchange, and guarantees at most one exchange in
/// flight at a time: concurrent callers share the pending operation and its
/// outcome. The resolved identity handle is reused across refreshes until
/// [`clear_credentials`](Self::clear_credentials).
pub struct CredentialCache<B, S> {
    broker: Arc<B>,
    store: Arc<S>,
    aws_region: String,
    user_pool_id: String,
    identity_pool_id: String,
    state: Arc<Mutex<CacheState>>,
}

impl<B: IdentityBroker, S: SessionStore> CredentialCache<B, S> {
    #[must_use]
    pub fn new(config: &AppConfig, broker: Arc<B>, store: Arc<S>) -> Self {
        Self {
            broker,
            store,
            aws_region: config.aws_region.clone(),
            user_pool_id: config.user_pool_id.clone(),
            identity_pool_id: config.identity_pool_id.clone(),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Get temporary credentials, reusing the cache while it stays more than
    /// [`REFRESH_BUFFER_MS`] away from expiry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingIdentityToken`] when no identity token is in
    /// session storage, or a federation error from the exchange. Coalesced
    /// waiters receive the same failure wrapped in [`Error::Shared`].
    pub async fn get_credentials(&self) -> Result<AwsCredentials, Error> {
        let exchange = {
            let mut state = self.state.lock();
            if let Some(cached) = &state.cached {
                if unix_now_ms() + REFRESH_BUFFER_MS < cached.expiration {
                    return Ok(cached.clone());
                }
            }
            // The in-flight handle is installed under the lock, before the
            // new exchange ever polls: overlapping callers always collapse
            // into one outstanding operation.
            match &state.in_flight {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.begin_exchange();
                    state.in_flight = Some(pending.clone());
                    pending
                }
            }
        };
        exchange.await.map_err(Error::Shared)
    }

    /// Synchronously drop the cached credential, identity handle, and any
    /// in-flight marker. Called on logout so a new login cycle cannot reuse
    /// an identity handle tied to the previous session's token.
    pub fn clear_credentials(&self) {
        let mut state = self.state.lock();
        state.cached = None;
        state.identity_id = None;
        state.in_flight = None;
        tracing::debug!("credential cache cleared");
    }

    fn begin_exchange(&self) -> SharedExchange {
        let broker = Arc::clone(&self.broker);
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let aws_region = self.aws_region.clone();
        let user_pool_id = self.user_pool_id.clone();
        let identity_pool_id = self.identity_pool_id.clone();

        async move {
            let result = run_exchange(
                broker,
                store,
                Arc::clone(&state),
                aws_region,
                user_pool_id,
                identity_pool_id,
            )
            .await;

            // Settle: clear the marker whatever happened, so a failure can
            // never wedge the guard.
            let mut state = state.lock();
            state.in_flight = None;
            match result {
                Ok(credentials) => {
                    state.cached = Some(credentials.clone());
                    Ok(credentials)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "credential exchange failed");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn run_exchange<B: IdentityBroker, S: SessionStore>(
    broker: Arc<B>,
    store: Arc<S>,
    state: Arc<Mutex<CacheState>>,
    aws_region: String,
    user_pool_id: String,
    identity_pool_id: String,
) -> Result<AwsCredentials, Error> {
    let id_token = store
        .get(keys::ID_TOKEN)
        .ok_or(Error::MissingIdentityToken)?;
    let logins = federation::login_map(&aws_region, &user_pool_id, &id_token);

    let known_identity = state.lock().identity_id.clone();
    let identity_id = match known_identity {
        Some(id) => id,
        None => {
            let id = broker.resolve_identity(&identity_pool_id, &logins).await?;
            state.lock().identity_id = Some(id.clone());
            id
        }
    };

    broker.credentials_for_identity(&identity_id, &logins).await
}

impl<B: IdentityBroker, S: SessionStore> CredentialScope for CredentialCache<B, S> {
    fn clear(&self) {
        self.clear_credentials();
    }
}

fn unix_now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::federation::LoginMap;
    use crate::store::MemoryStore;

    struct MockBroker {
        resolve_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
        /// Expiration offset from now, applied per exchange.
        expiration_offset_ms: i64,
        /// 1-based exchange indexes that should fail.
        failing_exchanges: Vec<usize>,
    }

    impl MockBroker {
        fn new(expiration_offset_ms: i64) -> Self {
            Self {
                resolve_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                expiration_offset_ms,
                failing_exchanges: Vec::new(),
            }
        }

        fn failing_on(mut self, exchange_index: usize) -> Self {
            self.failing_exchanges.push(exchange_index);
            self
        }
    }

    impl IdentityBroker for MockBroker {
        async fn resolve_identity(
            &self,
            _identity_pool_id: &str,
            _logins: &LoginMap,
        ) -> Result<String, Error> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("us-east-1:identity-1".to_string())
        }

        async fn credentials_for_identity(
            &self,
            identity_id: &str,
            _logins: &LoginMap,
        ) -> Result<AwsCredentials, Error> {
            let call = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.failing_exchanges.contains(&call) {
                return Err(Error::Federation {
                    operation: "GetCredentialsForIdentity",
                    detail: "simulated failure".to_string(),
                });
            }
            Ok(AwsCredentials {
                access_key_id: format!("ASIA{call}"),
                secret_access_key: "secret".to_string(),
                session_token: format!("session-for-{identity_id}"),
                expiration: unix_now_ms() + self.expiration_offset_ms,
            })
        }
    }

    fn store_with_token() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::ID_TOKEN, "header.payload.signature");
        store
    }

    fn cache_with(
        broker: Arc<MockBroker>,
        store: Arc<MemoryStore>,
    ) -> CredentialCache<MockBroker, MemoryStore> {
        let config = AppConfig {
            aws_region: "us-east-1".to_string(),
            user_pool_id: "us-east-1_Pool".to_string(),
            identity_pool_id: "us-east-1:pool".to_string(),
            ..AppConfig::default()
        };
        CredentialCache::new(&config, broker, store)
    }

    const ONE_HOUR_MS: i64 = 60 * 60 * 1000;

    #[tokio::test]
    async fn concurrent_callers_share_one_exchange() {
        let broker = Arc::new(MockBroker::new(ONE_HOUR_MS));
        let cache = cache_with(broker.clone(), store_with_token());

        let (a, b, c) = tokio::join!(
            cache.get_credentials(),
            cache.get_credentials(),
            cache.get_credentials(),
        );
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(broker.resolve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_network() {
        let broker = Arc::new(MockBroker::new(ONE_HOUR_MS));
        let cache = cache_with(broker.clone(), store_with_token());

        let first = cache.get_credentials().await.unwrap();
        let second = cache.get_credentials().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn near_expiry_refreshes_but_reuses_identity() {
        // expires inside the 5-minute buffer, so every call refreshes
        let broker = Arc::new(MockBroker::new(60 * 1000));
        let cache = cache_with(broker.clone(), store_with_token());

        cache.get_credentials().await.unwrap();
        cache.get_credentials().await.unwrap();
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 2);
        // the identity handle survives refreshes
        assert_eq!(broker.resolve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_drops_the_identity_handle() {
        let broker = Arc::new(MockBroker::new(ONE_HOUR_MS));
        let cache = cache_with(broker.clone(), store_with_token());

        cache.get_credentials().await.unwrap();
        cache.clear_credentials();
        cache.get_credentials().await.unwrap();
        assert_eq!(broker.resolve_calls.load(Ordering::SeqCst), 2);
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_identity_token_is_a_hard_error() {
        let broker = Arc::new(MockBroker::new(ONE_HOUR_MS));
        let cache = cache_with(broker.clone(), Arc::new(MemoryStore::new()));

        let err = cache.get_credentials().await.unwrap_err();
        assert!(
            matches!(&err, Error::Shared(inner) if matches!(**inner, Error::MissingIdentityToken)),
            "{err}"
        );
        assert_eq!(broker.resolve_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_without_wedging_the_guard() {
        let broker = Arc::new(MockBroker::new(ONE_HOUR_MS).failing_on(1));
        let cache = cache_with(broker.clone(), store_with_token());

        let (a, b) = tokio::join!(cache.get_credentials(), cache.get_credentials());
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 1);

        // the guard settled, so the next call starts a fresh exchange
        let recovered = cache.get_credentials().await.unwrap();
        assert_eq!(recovered.access_key_id, "ASIA2");
        assert_eq!(broker.exchange_calls.load(Ordering::SeqCst), 2);
    }
}
