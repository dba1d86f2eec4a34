use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemon_security::NetworkGuard;

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

/// One configuration layer, read from the TOML file or from flags.
#[derive(Debug, Clone, Default, Deserialize, clap::Args)]
#[serde(default, deny_unknown_fields)]
pub struct Overrides {
    /// HTTP listen address, empty disables HTTP
    #[arg(short = 'a', long = "address")]
    pub http_address: Option<String>,

    /// gRPC listen address, empty disables gRPC
    #[arg(short = 'g', long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// SQLite database file, empty keeps metrics in memory
    #[arg(short = 'd', long = "database")]
    pub database_path: Option<PathBuf>,

    /// Shared HMAC secret, empty disables signature checks
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PEM private key, enables decryption
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR of allowed agent addresses
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// Upper bound for one storage call, in seconds
    #[arg(long = "storage-timeout")]
    pub storage_timeout_secs: Option<u64>,

    /// Retry backoff unit in milliseconds
    #[arg(long = "retry-unit")]
    pub retry_unit_millis: Option<u64>,
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

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        Ok(Self {
            http_address: lookup("ADDRESS"),
            grpc_address: lookup("GRPC_ADDRESS"),
            database_path: lookup("DATABASE_DSN").map(PathBuf::from),
            key: lookup("KEY"),
            crypto_key: lookup("CRYPTO_KEY").map(PathBuf::from),
            trusted_subnet: lookup("TRUSTED_SUBNET"),
            storage_timeout_secs: lookup("STORAGE_TIMEOUT")
                .map(|v| parse_env("STORAGE_TIMEOUT", v))
                .transpose()?,
            retry_unit_millis: lookup("RETRY_UNIT")
                .map(|v| parse_env("RETRY_UNIT", v))
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
pub struct ServerConfig {
    pub http_address: Option<SocketAddr>,
    pub grpc_address: Option<SocketAddr>,
    pub database_path: Option<PathBuf>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
    pub storage_timeout: Duration,
    pub retry_unit: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            grpc_address: Some(SocketAddr::from(([0, 0, 0, 0], 3200))),
            database_path: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            storage_timeout: Duration::from_secs(5),
            retry_unit: Duration::from_secs(1),
        }
    }
}

fn listen_addr(field: &str, value: &str) -> Result<Option<SocketAddr>, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    // Bare ":8080" means every interface.
    let full = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };
    full.parse()
        .map(Some)
        .map_err(|e| ConfigError::Invalid(format!("{field} '{value}': {e}")))
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Defaults, then environment, then `file`, then `flags`.
    pub fn load(file: Option<&Path>, flags: Overrides) -> Result<Self, ConfigError> {
        let env = Overrides::from_env()?;
        let file = file.map(Overrides::from_file).transpose()?.unwrap_or_default();
        Self::resolve([env, file, flags])
    }

    pub fn resolve<I>(layers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Overrides>,
    {
        let mut config = Self::default();
        for layer in layers {
            config = config.merge(layer)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn merge(mut self, layer: Overrides) -> Result<Self, ConfigError> {
        if let Some(v) = layer.http_address {
            self.http_address = listen_addr("http address", &v)?;
        }
        if let Some(v) = layer.grpc_address {
            self.grpc_address = listen_addr("grpc address", &v)?;
        }
        if let Some(v) = layer.database_path {
            self.database_path = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = layer.key {
            self.key = non_empty(v);
        }
        if let Some(v) = layer.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = layer.trusted_subnet {
            self.trusted_subnet = non_empty(v);
        }
        if let Some(v) = layer.storage_timeout_secs {
            self.storage_timeout = Duration::from_secs(v);
        }
        if let Some(v) = layer.retry_unit_millis {
            self.retry_unit = Duration::from_millis(v);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_address.is_none() && self.grpc_address.is_none() {
            return Err(ConfigError::Invalid(
                "at least one of the HTTP and gRPC listeners must be enabled".into(),
            ));
        }
        if self.storage_timeout.is_zero() {
            return Err(ConfigError::Invalid("storage timeout must be positive".into()));
        }
        self.network_guard()?;
        Ok(())
    }

    pub fn network_guard(&self) -> Result<NetworkGuard, ConfigError> {
        NetworkGuard::parse(self.trusted_subnet.as_deref())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &str)]) -> Result<Overrides, ConfigError> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Overrides::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_listen_on_both_transports() {
        let config = ServerConfig::resolve([Overrides::default()]).unwrap();
        assert_eq!(config.http_address.unwrap().port(), 8080);
        assert_eq!(config.grpc_address.unwrap().port(), 3200);
        assert!(config.database_path.is_none());
        assert!(config.network_guard().unwrap().subnet().is_none());
    }

    #[test]
    fn layers_apply_in_order() {
        let env = env(&[
            ("ADDRESS", ":9000"),
            ("TRUSTED_SUBNET", "10.0.0.0/8"),
            ("KEY", "env-key"),
        ])
        .unwrap();
        let file: Overrides = toml::from_str(
            r#"
            key = "file-key"
            database_path = "/var/lib/telemon/metrics.db"
            "#,
        )
        .unwrap();
        let flags = Overrides {
            grpc_address: Some(String::new()),
            ..Default::default()
        };

        let config = ServerConfig::resolve([env, file, flags]).unwrap();
        assert_eq!(
            config.http_address,
            Some(SocketAddr::from(([0, 0, 0, 0], 9000)))
        );
        assert!(config.grpc_address.is_none());
        assert_eq!(config.key.as_deref(), Some("file-key"));
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/telemon/metrics.db"))
        );
        assert!(config.network_guard().unwrap().allow(Some("10.2.3.4")));
    }

    #[test]
    fn invalid_subnet_is_rejected() {
        let layer = env(&[("TRUSTED_SUBNET", "10.0.0.0/99")]).unwrap();
        assert!(matches!(
            ServerConfig::resolve([layer]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn disabling_both_listeners_is_rejected() {
        let layer = Overrides {
            http_address: Some(String::new()),
            grpc_address: Some(String::new()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve([layer]).is_err());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = env(&[("STORAGE_TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "STORAGE_TIMEOUT", .. }));
    }
}
