use super::{cache::FsVectorCache, factory::Connectors};
use crate::{
    config::StartArgs,
    core::{
        connector::ingest::Pipeline,
        embedder::Embedder,
        provider::ProviderFactory,
        service::connection::ConnectionService,
    },
    err,
    error::HubError,
};
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    /// Registers connections and turns them into connectors.
    pub connections: ConnectionService<PgPool>,

    /// Collaborators of document ingestion.
    pub pipeline: Arc<Pipeline<PgPool, FsVectorCache>>,

    /// Embedders by key.
    pub embedders: Arc<EmbeddingProvider>,
}

impl AppState {
    /// Load the application state using the provided configuration.
    pub async fn new(args: &StartArgs) -> Result<Self, HubError> {
        let postgres = crate::app::repo::pg::init(&args.db_url()?).await?;
        let cache = FsVectorCache::new(&args.cache_path()).await?;
        let embedders = Arc::new(Self::init_embedding_providers(args));

        info!("Available embedders: {:?}", embedders.list_provider_ids());

        let connections = ConnectionService::new(postgres.clone(), Arc::new(Connectors));
        let pipeline = Arc::new(Pipeline::new(postgres, cache, embedders.clone()));

        Ok(Self {
            connections,
            pipeline,
            embedders,
        })
    }

    fn init_embedding_providers(_args: &StartArgs) -> EmbeddingProvider {
        let mut provider = EmbeddingProvider::default();

        #[cfg(feature = "fe-remote")]
        if let Some(url) = _args.fembed_url() {
            let fastembed = Arc::new(crate::app::embedder::fastembed::init(url));
            provider.register(fastembed.id(), fastembed);
        }

        #[cfg(feature = "openai")]
        if let Some(key) = _args.openai_key() {
            let mut openai = crate::app::embedder::openai::OpenAiEmbeddings::new(&key);
            if let Some(endpoint) = _args.openai_endpoint() {
                openai = openai.with_endpoint(&endpoint);
            }
            let openai = Arc::new(openai);
            provider.register(openai.id(), openai);
        }

        provider
    }
}

/// Initialise the global tracing subscriber.
pub fn init_tracing(args: &StartArgs) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log()))
        .init();
}

/// Creates and implements functions for `$target` to easily get an instance of whatever
/// the provider is for, i.e. `$provider_out`.
macro_rules! provider {
    (
        $( $target:ident -> $provider_out:ident ),+
    ) => {
        $(
            #[derive(Clone, Default)]
            pub struct $target {
                providers: HashMap<&'static str, Arc<dyn $provider_out + Send + Sync>>,
            }

            impl ProviderFactory<Arc<dyn $provider_out + Send + Sync>> for $target {
                fn get_provider(
                    &self,
                    input: &str,
                ) -> Result<Arc<dyn $provider_out + Send + Sync>, HubError> {
                    match self.providers.get(input).cloned() {
                        Some(e) => Ok(e),
                        None => err!(InvalidProvider, "{input}"),
                    }
                }

                fn list_provider_ids(&self) -> Vec<&'static str> {
                    let mut ids: Vec<_> = self.providers.keys().cloned().collect();
                    ids.sort_unstable();
                    ids
                }

                fn register(
                    &mut self,
                    id: &'static str,
                    provider: Arc<dyn $provider_out + Send + Sync>,
                ) {
                    self.providers.insert(id, provider);
                }
            }
        )+
    };
}

provider! {
    EmbeddingProvider -> Embedder
}
