use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_core::cache::RedisRevocationStore;
use rollcall_core::clock::{Clock, SystemClock};
use rollcall_core::config::{Config, RevocationBackend};
use rollcall_core::jwt::TokenService;
use rollcall_core::repository::{self, revocation::RevocationRepositoryImpl, RevocationRepository};
use rollcall_core::service::{PasswordPolicyEngine, RevocationRegistry};
use rollcall_core::telemetry;
use std::sync::Arc;
use tracing::info;

/// Rollcall Core maintenance tool
#[derive(Parser)]
#[command(name = "rollcall-core", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Remove expired revocation entries once
    Sweep,
    /// Sweep expired revocation entries periodically until interrupted
    Sweeper,
    /// Print the password policy verdict as JSON
    CheckPassword { password: String },
    /// Print the unverified claims of a token (diagnostics only)
    InspectToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckPassword { password } => {
            let verdict = PasswordPolicyEngine::new().validate(&password);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::InspectToken { token } => {
            match TokenService::decode(&token) {
                Some(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
                None => anyhow::bail!("Not a decodable access token"),
            }
            Ok(())
        }
        Command::Migrate => {
            let config = Config::from_env()?;
            telemetry::init_tracing(&config.telemetry);
            let pool = repository::connect(&config.database).await?;
            repository::run_migrations(&pool).await?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Sweep => {
            let config = Config::from_env()?;
            telemetry::init_tracing(&config.telemetry);
            with_revocation_store(&config, |registry| async move {
                let removed = registry.sweep_expired().await?;
                println!("{}", serde_json::json!({ "removed": removed }));
                Ok(())
            })
            .await
        }
        Command::Sweeper => {
            let config = Config::from_env()?;
            telemetry::init_tracing(&config.telemetry);
            if let Some(addr) = config.telemetry.metrics_addr.as_deref() {
                telemetry::metrics::install_prometheus_exporter(addr)?;
                info!(addr, "Metrics exporter listening");
            }
            let interval = config.revocation.sweep_interval();
            with_revocation_store(&config, |registry| async move {
                registry.load().await?;
                registry.spawn_sweeper(interval);
                info!(interval_secs = interval.as_secs(), "Revocation sweeper started");

                tokio::signal::ctrl_c().await?;
                info!("Shutdown signal received");
                registry.close().await;
                Ok(())
            })
            .await
        }
    }
}

/// Build a registry over the configured backend and hand it to `run`.
async fn with_revocation_store<F, Fut>(config: &Config, run: F) -> Result<()>
where
    F: FnOnce(Arc<dyn SweepTarget>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let target: Arc<dyn SweepTarget> = match config.revocation.backend {
        RevocationBackend::Mysql => {
            let pool = repository::connect(&config.database).await?;
            registry(RevocationRepositoryImpl::new(pool), clock, config)
        }
        RevocationBackend::Redis => {
            let store = RedisRevocationStore::new(&config.redis).await?;
            registry(store, clock, config)
        }
    };
    run(target).await
}

fn registry<R: RevocationRepository + 'static>(
    repo: R,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Arc<dyn SweepTarget> {
    Arc::new(Arc::new(RevocationRegistry::new(
        Arc::new(repo),
        clock,
        config.revocation.clone(),
        config.jwt.max_token_lifetime(),
    )))
}

/// Backend-erased view of a registry for the maintenance commands
#[async_trait::async_trait]
trait SweepTarget: Send + Sync {
    async fn load(&self) -> Result<usize>;
    async fn sweep_expired(&self) -> Result<u64>;
    fn spawn_sweeper(&self, interval: std::time::Duration);
    async fn close(&self);
}

#[async_trait::async_trait]
impl<R: RevocationRepository + 'static> SweepTarget for Arc<RevocationRegistry<R>> {
    async fn load(&self) -> Result<usize> {
        Ok((**self).load().await?)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        Ok((**self).sweep_expired().await?)
    }

    fn spawn_sweeper(&self, interval: std::time::Duration) {
        RevocationRegistry::spawn_sweeper(self, interval)
    }

    async fn close(&self) {
        (**self).close().await
    }
}
