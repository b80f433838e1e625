use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Knobs for one update run.
///
/// Cadence × `batch_size` must cover the target daily volume: a 10 minute
/// schedule with the default of 5 processes 720 items/day.
#[derive(Clone)]
pub struct UpdaterConfig {
    pub batch_size: usize,
    pub lease_duration: Duration,
    pub invocation_deadline: Duration,
    pub auth_secret: String,
}

impl std::fmt::Debug for UpdaterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterConfig")
            .field("batch_size", &self.batch_size)
            .field("lease_duration", &self.lease_duration)
            .field("invocation_deadline", &self.invocation_deadline)
            .field("auth_secret", &"***")
            .finish()
    }
}

impl UpdaterConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 5;
    pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_INVOCATION_DEADLINE: Duration = Duration::from_secs(60);

    pub fn new(auth_secret: impl Into<String>) -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            lease_duration: Self::DEFAULT_LEASE_DURATION,
            invocation_deadline: Self::DEFAULT_INVOCATION_DEADLINE,
            auth_secret: auth_secret.into(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_invocation_deadline(mut self, deadline: Duration) -> Self {
        self.invocation_deadline = deadline;
        self
    }

    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let auth_secret = std::env::var("POKESYNC_AUTH_SECRET")
            .or_else(|_| std::env::var("CRON_SECRET"))
            .map_err(|_| {
                Error::InvalidInput("POKESYNC_AUTH_SECRET (or CRON_SECRET) is required".into())
            })?;
        let batch_size = env_parse::<usize>("POKESYNC_BATCH_SIZE")?
            .unwrap_or(Self::DEFAULT_BATCH_SIZE);
        let lease_duration = env_parse::<u64>("POKESYNC_LEASE_DURATION_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_LEASE_DURATION);
        let invocation_deadline = env_parse::<u64>("POKESYNC_INVOCATION_DEADLINE_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_INVOCATION_DEADLINE);

        let cfg = Self {
            batch_size,
            lease_duration,
            invocation_deadline,
            auth_secret,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".into()));
        }
        if self.lease_duration.is_zero() {
            return Err(Error::InvalidInput("lease_duration must be > 0".into()));
        }
        if self.invocation_deadline.is_zero() {
            return Err(Error::InvalidInput("invocation_deadline must be > 0".into()));
        }
        // A run that is still inside its deadline must never see its own leases expire.
        if self.lease_duration < self.invocation_deadline {
            return Err(Error::InvalidInput(
                "lease_duration must be >= invocation_deadline".into(),
            ));
        }
        if self.auth_secret.trim().is_empty() {
            return Err(Error::InvalidInput("auth_secret is empty".into()));
        }
        Ok(())
    }
}

/// Where queue and entity rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres {
        url: String,
        max_connections: u32,
        acquire_timeout: Duration,
    },
    Sqlite {
        path: PathBuf,
    },
}

impl StoreConfig {
    /// Postgres when `POKESYNC_DATABASE_URL`/`DATABASE_URL` is set, else a SQLite
    /// file under `data_dir`.
    #[tracing::instrument(level = "debug")]
    pub fn from_env(data_dir: PathBuf) -> Result<Self> {
        let url = std::env::var("POKESYNC_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()
            .filter(|v| !v.trim().is_empty());
        let cfg = match url {
            Some(url) => Self::Postgres {
                url,
                max_connections: env_parse::<u32>("POKESYNC_DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(5),
                acquire_timeout: Duration::from_millis(
                    env_parse::<u64>("POKESYNC_DATABASE_ACQUIRE_TIMEOUT_MS")?.unwrap_or(5_000),
                ),
            },
            None => Self::Sqlite {
                path: data_dir.join("pokesync.db"),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StoreConfig::Postgres {
                url,
                max_connections,
                acquire_timeout,
            } => {
                if url.trim().is_empty() {
                    return Err(Error::InvalidInput("database url is empty".into()));
                }
                if *max_connections == 0 {
                    return Err(Error::InvalidInput("max_connections must be > 0".into()));
                }
                if acquire_timeout.is_zero() {
                    return Err(Error::InvalidInput("acquire_timeout must be > 0".into()));
                }
            }
            StoreConfig::Sqlite { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidInput("sqlite path is empty".into()));
                }
            }
        }
        Ok(())
    }
}

/// Remote source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PokeApiConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for PokeApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pokeapi.co/api/v2".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PokeApiConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            base_url: std::env::var("POKESYNC_POKEAPI_BASE_URL").unwrap_or(defaults.base_url),
            request_timeout: env_parse::<u64>("POKESYNC_HTTP_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::InvalidInput("pokeapi base_url is empty".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidInput("request_timeout must be > 0".into()));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{key}: {e}"))),
        _ => Ok(None),
    }
}
