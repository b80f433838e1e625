use clap::Parser;
use pokesync_core::config::StoreConfig;
use pokesync_server::cli::{Cli, Commands, enqueue_ids};
use pokesync_server::server::{self, Settings};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pokesync_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(Commands::default_serve) {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let state = server::build_state(Settings::from_env(data_dir)?).await?;
            server::serve(addr, state).await?;
        }
        Commands::RunOnce { data_dir } => {
            let state = server::build_state(Settings::from_env(data_dir)?).await?;
            let report = state.processor.run_with_deadline().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate { data_dir } => {
            // Connecting applies migrations.
            pokesync_core::store::connect(&StoreConfig::from_env(data_dir)?).await?;
            tracing::info!("migrations applied");
        }
        Commands::Enqueue {
            data_dir,
            ids,
            through,
        } => {
            let ids = enqueue_ids(&ids, through);
            if ids.is_empty() {
                anyhow::bail!("nothing to enqueue: pass ids or --through N");
            }
            let store = pokesync_core::store::connect(&StoreConfig::from_env(data_dir)?).await?;
            let inserted = store.enqueue(&ids).await?;
            println!("enqueued {inserted} of {} ids", ids.len());
        }
        Commands::Stats { data_dir } => {
            let store = pokesync_core::store::connect(&StoreConfig::from_env(data_dir)?).await?;
            let stats = store.queue_stats(chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Config => {
            fn redact(s: &str) -> String {
                let chars: Vec<char> = s.chars().collect();
                if chars.len() <= 8 {
                    return "***".to_string();
                }
                let head: String = chars[..4].iter().collect();
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("{head}***{tail}")
            }
            let var = |k: &str| std::env::var(k).ok();

            let cfg = serde_json::json!({
                "POKESYNC_DATABASE_URL": var("POKESYNC_DATABASE_URL").map(|v| redact(&v)),
                "DATABASE_URL": var("DATABASE_URL").map(|v| redact(&v)),
                "POKESYNC_AUTH_SECRET": var("POKESYNC_AUTH_SECRET").map(|_| "<set>"),
                "CRON_SECRET": var("CRON_SECRET").map(|_| "<set>"),
                "POKESYNC_BATCH_SIZE": var("POKESYNC_BATCH_SIZE"),
                "POKESYNC_LEASE_DURATION_SECONDS": var("POKESYNC_LEASE_DURATION_SECONDS"),
                "POKESYNC_INVOCATION_DEADLINE_SECONDS": var("POKESYNC_INVOCATION_DEADLINE_SECONDS"),
                "POKESYNC_POKEAPI_BASE_URL": var("POKESYNC_POKEAPI_BASE_URL"),
                "POKESYNC_HTTP_TIMEOUT_MS": var("POKESYNC_HTTP_TIMEOUT_MS"),
                "POKESYNC_DATA_DIR": var("POKESYNC_DATA_DIR"),
                "POKESYNC_LOG_FORMAT": var("POKESYNC_LOG_FORMAT"),
            });
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Commands::Check { data_dir } => {
            let cfg = StoreConfig::from_env(data_dir)?;
            let backend = match &cfg {
                StoreConfig::Postgres { .. } => "postgres",
                StoreConfig::Sqlite { .. } => "sqlite",
            };
            match pokesync_core::store::connect(&cfg).await {
                Ok(store) => match store.queue_stats(chrono::Utc::now()).await {
                    Ok(_) => println!("{backend}: ok"),
                    Err(e) => println!("{backend}: error ({e})"),
                },
                Err(e) => println!("{backend}: error ({e})"),
            }
        }
    }

    Ok(())
}
