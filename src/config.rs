use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum, builder::BoolishValueParser};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::lock_service::default_lock_path;

/// Bucket names shipped in sample env files. Treated as "not configured".
pub const PLACEHOLDER_BUCKET_NAMES: [&str; 2] = ["your-gcs-bucket-name", "your-bucket-name"];

const DEFAULT_INTERVAL_MINUTES: u64 = 15;
const DEFAULT_REMOTE_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Which object store the offload pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OffloadBackend {
    /// S3-compatible API (AWS, MinIO, GCS interoperability).
    #[value(alias = "gcs")]
    S3,
    /// Plain directory tree, for development.
    Local,
}

impl FromStr for OffloadBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" | "gcs" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => bail!("unknown offload backend `{other}` (expected s3 or local)"),
        }
    }
}

/// Settings read by the offload cycle and the resume read path.
///
/// Handed to every scheduled cycle as arguments, so a settings update is
/// picked up at the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadSettings {
    pub enabled: bool,
    pub upload_root: PathBuf,
    pub bucket: Option<String>,
    pub interval: Duration,
    /// Delay before the one retry of a cycle whose bucket could not be opened.
    pub retry_delay: Duration,
}

impl OffloadSettings {
    /// The configured bucket, unless it is missing, blank or a placeholder.
    pub fn usable_bucket(&self) -> Option<&str> {
        self.bucket
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !PLACEHOLDER_BUCKET_NAMES.contains(name))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub offload: OffloadSettings,
    pub backend: OffloadBackend,
    pub local_store_dir: PathBuf,
    pub s3_endpoint: Option<String>,
    pub lock_file: PathBuf,
    pub remote_fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    OffloadOnce,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Job board backend with resume offload to object storage")]
pub struct Args {
    /// Host to bind to (overrides JOBBOARD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides JOBBOARD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides JOBBOARD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory submitted resumes are written to (overrides JOBBOARD_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Enable resume offload (overrides JOBBOARD_OFFLOAD_ENABLED)
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub offload_enabled: Option<bool>,

    /// Target bucket (overrides JOBBOARD_OFFLOAD_BUCKET)
    #[arg(long)]
    pub offload_bucket: Option<String>,

    /// Minutes between offload cycles (overrides JOBBOARD_OFFLOAD_INTERVAL_MINUTES)
    #[arg(long)]
    pub offload_interval_minutes: Option<u64>,

    /// Object store backend (overrides JOBBOARD_OFFLOAD_BACKEND)
    #[arg(long, value_enum)]
    pub offload_backend: Option<OffloadBackend>,

    /// Root of the local backend (overrides JOBBOARD_OFFLOAD_LOCAL_STORE_DIR)
    #[arg(long)]
    pub offload_local_store_dir: Option<PathBuf>,

    /// Custom S3 endpoint URL (overrides JOBBOARD_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Seconds before retrying a cycle after bucket setup failed (overrides JOBBOARD_OFFLOAD_RETRY_SECS)
    #[arg(long)]
    pub offload_retry_secs: Option<u64>,

    /// Cross-process scheduler lock file (overrides JOBBOARD_OFFLOAD_LOCK_FILE)
    #[arg(long)]
    pub offload_lock_file: Option<PathBuf>,

    /// Timeout for reading offloaded resumes (overrides JOBBOARD_REMOTE_FETCH_TIMEOUT_SECS)
    #[arg(long)]
    pub remote_fetch_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run a single offload cycle (if the lock can be taken) and exit
    #[arg(long, conflicts_with = "migrate")]
    pub offload_once: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args_with(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over values looked up through `env`.
    pub fn from_args_with(
        args: Args,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env("JOBBOARD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_env(&env, "JOBBOARD_PORT")?.unwrap_or(5000);
        let env_db =
            env("JOBBOARD_DATABASE_URL").unwrap_or_else(|| "sqlite://./data/jobboard.db".into());
        let env_upload = env("JOBBOARD_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("static/resumes"));
        let env_enabled = match env("JOBBOARD_OFFLOAD_ENABLED") {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("parsing JOBBOARD_OFFLOAD_ENABLED value `{value}`"))?,
            None => false,
        };
        let env_interval = parse_env(&env, "JOBBOARD_OFFLOAD_INTERVAL_MINUTES")?
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);
        let env_retry =
            parse_env(&env, "JOBBOARD_OFFLOAD_RETRY_SECS")?.unwrap_or(DEFAULT_RETRY_DELAY_SECS);
        let env_backend = parse_env(&env, "JOBBOARD_OFFLOAD_BACKEND")?.unwrap_or(OffloadBackend::S3);
        let env_local_store = env("JOBBOARD_OFFLOAD_LOCAL_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/offload"));
        let env_lock = env("JOBBOARD_OFFLOAD_LOCK_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(default_lock_path);
        let env_timeout = parse_env(&env, "JOBBOARD_REMOTE_FETCH_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_REMOTE_FETCH_TIMEOUT_SECS);

        // --- Merge ---
        let interval_minutes = args.offload_interval_minutes.unwrap_or(env_interval);
        if interval_minutes == 0 {
            bail!("offload interval must be at least one minute");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            offload: OffloadSettings {
                enabled: args.offload_enabled.unwrap_or(env_enabled),
                upload_root: args.upload_dir.unwrap_or(env_upload),
                bucket: args.offload_bucket.or_else(|| env("JOBBOARD_OFFLOAD_BUCKET")),
                interval: Duration::from_secs(interval_minutes * 60),
                retry_delay: Duration::from_secs(args.offload_retry_secs.unwrap_or(env_retry)),
            },
            backend: args.offload_backend.unwrap_or(env_backend),
            local_store_dir: args.offload_local_store_dir.unwrap_or(env_local_store),
            s3_endpoint: args.s3_endpoint.or_else(|| env("JOBBOARD_S3_ENDPOINT")),
            lock_file: args.offload_lock_file.unwrap_or(env_lock),
            remote_fetch_timeout: Duration::from_secs(
                args.remote_fetch_timeout_secs.unwrap_or(env_timeout),
            ),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.offload_once {
            RunMode::OffloadOnce
        } else {
            RunMode::Serve
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parsing {name} value `{value}`: {err}")),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("`{other}` is not a boolean"),
    }
}
