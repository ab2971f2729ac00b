use std::sync::Arc;

use remote::{Backend, supabase::SupabaseProject};

use super::{
    config::Config,
    counts::CountsCache,
    error::AppError,
    session::{AuthStore, SessionFile},
};

/// Hands out table API clients acting as the signed-in user.
pub trait Connector: Send + Sync {
    fn backend(&self, access_token: Option<&str>) -> Arc<dyn Backend>;
}

impl Connector for SupabaseProject {
    fn backend(&self, access_token: Option<&str>) -> Arc<dyn Backend> {
        Arc::new(SupabaseProject::backend(self, access_token))
    }
}

/// Always the same backend, whoever asks.
pub struct Fixed(pub Arc<dyn Backend>);

impl Connector for Fixed {
    fn backend(&self, _: Option<&str>) -> Arc<dyn Backend> {
        self.0.clone()
    }
}

pub struct State {
    pub config: Config,
    pub auth: AuthStore,
    pub counts_cache: Arc<CountsCache>,
    connector: Box<dyn Connector>,
}

impl State {
    pub async fn new() -> Result<Arc<Self>, AppError> {
        let config = Config::load()?;

        let project = SupabaseProject::new(&config.supabase_url, &config.anon_key);
        let auth = AuthStore::new(
            Arc::new(project.identity()),
            SessionFile::new(config.session_path.clone()),
        );
        auth.initialize().await?;

        Ok(Arc::new(Self::with_parts(config, auth, Box::new(project))))
    }

    pub fn with_parts(config: Config, auth: AuthStore, connector: Box<dyn Connector>) -> Self {
        let counts_cache = Arc::new(CountsCache::new(config.counts_ttl));

        Self {
            config,
            auth,
            counts_cache,
            connector,
        }
    }

    pub async fn backend(&self) -> Arc<dyn Backend> {
        let token = self.auth.access_token().await;
        self.connector.backend(token.as_deref())
    }
}
