//! Pool of long-lived platform API clients keyed by provider name

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cache::flight::FlightCache;
use crate::errors::AgentError;

/// Builds a client for one platform provider
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;
    type Config: Clone + Send + Sync + 'static;

    async fn build(&self, provider: &str, config: &Self::Config) -> Result<Self::Client, AgentError>;
}

/// Lazily built, shared platform clients.
///
/// The first caller for a provider builds its client with the configuration
/// it passes; later callers share that client whatever configuration they
/// pass. A failed build is returned to everyone who waited on it and retried
/// by the next caller.
pub struct ClientRegistry<F: ClientFactory> {
    factory: Arc<F>,
    clients: FlightCache<String, F::Client>,
}

impl<F: ClientFactory> ClientRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            clients: FlightCache::new(),
        }
    }

    /// Get the client for `provider`, building it on first use
    pub async fn client(&self, provider: &str, config: &F::Config) -> Result<F::Client, AgentError> {
        let factory = self.factory.clone();
        let name = provider.to_string();
        let config = config.clone();

        self.clients
            .get_or_try_insert_with(provider.to_string(), move || async move {
                let client = factory.build(&name, &config).await?;
                info!("Built platform client for provider {}", name);
                Ok(client)
            })
            .await
            .map_err(|source| AgentError::PlatformError {
                provider: provider.to_string(),
                source,
            })
    }

    /// Number of providers with a built client
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
