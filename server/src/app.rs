//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::api::ApiServer;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::ENV_LOG;
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::cache::{CacheService, RateLimiter};
use crate::data::events::EventLogService;
use crate::data::sqlite::SqliteService;
use crate::domain::chat::{ChatEngine, StopRegistry};
use crate::domain::providers::ProviderRegistry;

pub struct CoreApp {
    pub config: AppConfig,
    pub storage: AppStorage,
    pub shutdown: ShutdownService,
    pub database: Arc<SqliteService>,
    pub cache: Arc<CacheService>,
    pub events: Arc<EventLogService>,
    pub stops: Arc<StopRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub engine: Arc<ChatEngine>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Paths) => {
                println!("{}", AppStorage::resolve_data_dir().display());
                return Ok(());
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init().await?;

        let database = Arc::new(SqliteService::init(&storage).await?);

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let events = Arc::new(
            EventLogService::new(&config.stream)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize event log: {}", e))?,
        );
        tracing::debug!(backend = events.backend_name(), "Event log initialized");

        let stops = Arc::new(StopRegistry::new(
            Arc::clone(&cache),
            Duration::from_secs(config.stream.stop_flag_ttl_secs),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&cache), &config.rate_limit));
        let providers = Arc::new(ProviderRegistry::new(&config.providers));

        let engine = Arc::new(ChatEngine::new(
            database.pool().clone(),
            Arc::clone(&cache),
            Arc::clone(&events),
            Arc::clone(&stops),
            Arc::clone(&rate_limiter),
            providers,
            config.providers.clone(),
            &config.stream,
        ));

        let shutdown = ShutdownService::new(Arc::clone(&database));

        Ok(Self {
            config,
            storage,
            shutdown,
            database,
            cache,
            events,
            stops,
            rate_limiter,
            engine,
        })
    }

    async fn start_server(app: CoreApp) -> Result<()> {
        banner::print(&app.config);

        let shutdown = app.shutdown.clone();
        shutdown.install_signal_handlers();

        let server = ApiServer::new(app);
        let app = server.start().await?;

        app.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_env(ENV_LOG)
            .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
