use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "grpc" => Ok(TransportKind::Grpc),
            other => Err(format!("unknown transport '{other}', expected http or grpc")),
        }
    }
}

/// One configuration layer. Every field is optional; later layers win.
///
/// The same struct is read from the TOML file and from command-line flags.
#[derive(Debug, Clone, Default, Deserialize, clap::Args)]
#[serde(default, deny_unknown_fields)]
pub struct Overrides {
    /// Server address as host:port
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Wire transport
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Seconds between samples
    #[arg(short = 'p', long = "poll-interval")]
    pub poll_interval_secs: Option<u64>,

    /// Seconds between delivery passes
    #[arg(short = 'r', long = "report-interval")]
    pub report_interval_secs: Option<u64>,

    /// Number of delivery workers
    #[arg(short = 'l', long = "rate-limit")]
    pub workers: Option<usize>,

    /// Shared HMAC secret, empty disables signing
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PEM public key of the server, enables encryption
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// gzip request bodies
    #[arg(long)]
    pub compress: Option<bool>,

    /// Source address reported to the server
    #[arg(long = "real-ip")]
    pub real_ip: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long = "request-timeout")]
    pub request_timeout_secs: Option<u64>,
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        reason: e.to_string(),
        value,
    })
}

impl Overrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the environment layer through `lookup`, so tests need not
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let opt = |var: &'static str| lookup(var);
        Ok(Self {
            address: opt("ADDRESS"),
            transport: opt("TRANSPORT").map(|v| parse_env("TRANSPORT", v)).transpose()?,
            poll_interval_secs: opt("POLL_INTERVAL")
                .map(|v| parse_env("POLL_INTERVAL", v))
                .transpose()?,
            report_interval_secs: opt("REPORT_INTERVAL")
                .map(|v| parse_env("REPORT_INTERVAL", v))
                .transpose()?,
            workers: opt("RATE_LIMIT").map(|v| parse_env("RATE_LIMIT", v)).transpose()?,
            key: opt("KEY"),
            crypto_key: opt("CRYPTO_KEY").map(PathBuf::from),
            compress: opt("COMPRESS").map(|v| parse_env("COMPRESS", v)).transpose()?,
            real_ip: opt("REAL_IP"),
            request_timeout_secs: opt("REQUEST_TIMEOUT")
                .map(|v| parse_env("REQUEST_TIMEOUT", v))
                .transpose()?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub workers: usize,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub compress: bool,
    pub real_ip: Option<String>,
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            transport: TransportKind::Http,
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            workers: 2,
            key: None,
            crypto_key: None,
            compress: true,
            real_ip: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl AgentConfig {
    /// Defaults, then environment, then `file`, then `flags`.
    pub fn load(file: Option<&Path>, flags: Overrides) -> Result<Self, ConfigError> {
        let env = Overrides::from_env()?;
        let file = file.map(Overrides::from_file).transpose()?.unwrap_or_default();
        Self::resolve([env, file, flags])
    }

    /// Applies `layers` in order over the defaults and validates the result.
    pub fn resolve<I>(layers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Overrides>,
    {
        let config = layers
            .into_iter()
            .fold(Self::default(), |config, layer| config.merge(layer));
        config.validate()?;
        Ok(config)
    }

    fn merge(mut self, layer: Overrides) -> Self {
        if let Some(v) = layer.address {
            self.address = v;
        }
        if let Some(v) = layer.transport {
            self.transport = v;
        }
        if let Some(v) = layer.poll_interval_secs {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = layer.report_interval_secs {
            self.report_interval = Duration::from_secs(v);
        }
        if let Some(v) = layer.workers {
            self.workers = v;
        }
        if let Some(v) = layer.key {
            self.key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = layer.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = layer.compress {
            self.compress = v;
        }
        if let Some(v) = layer.real_ip {
            self.real_ip = Some(v).filter(|ip| !ip.is_empty());
        }
        if let Some(v) = layer.request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".into()));
        }
        if self.poll_interval.is_zero() || self.report_interval.is_zero() {
            return Err(ConfigError::Invalid("intervals must be positive".into()));
        }
        if self.report_interval < self.poll_interval {
            return Err(ConfigError::Invalid(
                "report interval must not be shorter than poll interval".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("at least one worker is required".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }
        Ok(())
    }

    /// Base URL for the configured address, `http://` unless a scheme is given.
    pub fn endpoint(&self) -> String {
        let addr = self.address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }

    /// Address reported in `X-Real-IP`: the configured one, otherwise the
    /// local address the OS would route to the server from.
    pub fn source_ip(&self) -> Option<String> {
        if let Some(ip) = &self.real_ip {
            return Some(ip.clone());
        }
        let host = self
            .address
            .split("://")
            .last()
            .unwrap_or(&self.address)
            .trim_end_matches('/');
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        // connect() on UDP only selects a route; nothing is sent.
        socket.connect(host).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip().to_string())
    }

    /// Queue capacity: two report cycles worth of samples.
    pub fn queue_capacity(&self) -> usize {
        let per_report = self
            .report_interval
            .as_millis()
            .div_ceil(self.poll_interval.as_millis().max(1));
        usize::try_from(per_report.saturating_mul(2))
            .unwrap_or(usize::MAX)
            .max(1)
    }
}
