use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_NAME: &str = "calculations.log";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server settings. Flags win over environment variables, which a `.env`
/// file in the working directory may provide.
#[derive(Parser, Clone, Debug)]
#[clap(name = "abacus", author, version, about = "Arithmetic service with a durable calculation history")]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    #[clap(long, env = "ABACUS_ADDR", default_value = "0.0.0.0:3000")]
    pub addr: SocketAddr,

    /// Directory holding the calculation log
    #[clap(long, env = "ABACUS_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Default log filter; RUST_LOG overrides it
    #[clap(long, env = "ABACUS_LOG", default_value = "info")]
    pub log_level: String,

    #[clap(long, env = "ABACUS_LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Seconds between log compactions, 0 disables them
    #[clap(long, env = "ABACUS_COMPACTION_INTERVAL", default_value = "600")]
    pub compaction_interval: u64,

    /// Fsync every write. Defaults to what the host profile suggests
    #[clap(long, env = "ABACUS_STRICT_DURABILITY")]
    pub strict_durability: Option<bool>,
}

impl ServerConfig {
    /// Loads `.env` if present, then parses the command line.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }

    pub fn compaction_interval(&self) -> Option<Duration> {
        (self.compaction_interval > 0).then(|| Duration::from_secs(self.compaction_interval))
    }

    /// Installs the global tracing subscriber.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        match self.log_format {
            LogFormat::Json => fmt().json().with_env_filter(filter).init(),
            LogFormat::Pretty => fmt().with_target(false).with_level(true).with_env_filter(filter).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::try_parse_from(["abacus"]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_path(), PathBuf::from("data").join(LOG_FILE_NAME));
        assert_eq!(config.compaction_interval(), Some(Duration::from_secs(600)));
        assert_eq!(config.strict_durability, None);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "abacus",
            "--addr",
            "127.0.0.1:8080",
            "--data-dir",
            "/var/lib/abacus",
            "--log-format",
            "json",
            "--compaction-interval",
            "0",
            "--strict-durability",
            "true",
        ])
        .unwrap();

        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.log_path(), PathBuf::from("/var/lib/abacus/calculations.log"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.compaction_interval(), None);
        assert_eq!(config.strict_durability, Some(true));
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(ServerConfig::try_parse_from(["abacus", "--addr", "localhost"]).is_err());
    }
}
