//! Opaque bearer-token acquisition and renewal

use std::sync::RwLock;

use super::api::{ApiError, ApiResult};

/// Supplies the bearer token for remote calls.
pub trait TokenProvider: Send + Sync {
    /// The token to use for the next call.
    fn current_token(&self) -> ApiResult<String>;

    /// Discard the current token and obtain a fresh one.
    fn refresh_token(&self) -> ApiResult<String>;
}

/// A fixed token that never changes.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn current_token(&self) -> ApiResult<String> {
        Ok(self.0.clone())
    }

    fn refresh_token(&self) -> ApiResult<String> {
        Ok(self.0.clone())
    }
}

type Exchange = dyn Fn(&str) -> ApiResult<String> + Send + Sync;

/// Exchanges an API key for an access token and caches the result.
///
/// The exchange itself (an HTTP call in production) is injected.
pub struct ApiKeyTokenProvider {
    api_key: String,
    exchange: Box<Exchange>,
    cached: RwLock<Option<String>>,
}

impl ApiKeyTokenProvider {
    pub fn new(
        api_key: impl Into<String>,
        exchange: impl Fn(&str) -> ApiResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            exchange: Box::new(exchange),
            cached: RwLock::new(None),
        }
    }

    fn store(&self, token: String) -> ApiResult<String> {
        let mut cached = self
            .cached
            .write()
            .map_err(|_| ApiError::Auth("token cache poisoned".to_string()))?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

impl TokenProvider for ApiKeyTokenProvider {
    fn current_token(&self) -> ApiResult<String> {
        if let Ok(cached) = self.cached.read() {
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }
        let token = (self.exchange)(&self.api_key)?;
        self.store(token)
    }

    fn refresh_token(&self) -> ApiResult<String> {
        tracing::debug!("exchanging API key for a fresh access token");
        let token = (self.exchange)(&self.api_key)?;
        self.store(token)
    }
}

impl std::fmt::Debug for ApiKeyTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyTokenProvider").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn current_token_is_exchanged_once_then_cached() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();
        let provider = ApiKeyTokenProvider::new("key", move |key| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}-token-{}", key, n))
        });

        assert_eq!(provider.current_token().unwrap(), "key-token-0");
        assert_eq!(provider.current_token().unwrap(), "key-token-0");
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_replaces_the_cached_token() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();
        let provider = ApiKeyTokenProvider::new("key", move |_| {
            Ok(format!("t{}", counter.fetch_add(1, Ordering::SeqCst)))
        });

        assert_eq!(provider.current_token().unwrap(), "t0");
        assert_eq!(provider.refresh_token().unwrap(), "t1");
        assert_eq!(provider.current_token().unwrap(), "t1");
    }

    #[test]
    fn failed_exchange_propagates() {
        let provider =
            ApiKeyTokenProvider::new("key", |_| Err(ApiError::Auth("bad key".to_string())));
        assert!(provider.current_token().unwrap_err().is_auth());
    }
}
