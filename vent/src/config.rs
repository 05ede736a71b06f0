use std::path::PathBuf;
use std::str::FromStr;

use crate::spec::SpecSource;

/// Which database dialect the store opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbAdapterKind {
    Postgres,
    Sqlite,
}

impl FromStr for DbAdapterKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<DbAdapterKind, ConfigError> {
        match value {
            "postgres" => Ok(DbAdapterKind::Postgres),
            "sqlite" => Ok(DbAdapterKind::Sqlite),
            _ => Err(ConfigError::UnknownAdapter(value.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<LogLevel, ConfigError> {
        match value {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(ConfigError::UnknownLogLevel(value.to_string())),
        }
    }
}

/// Engine configuration. The CLI collaborator fills this from its flags; the
/// engine only validates and consumes it.
#[derive(Clone, Debug)]
pub struct Config {
    pub db_adapter: DbAdapterKind,
    pub db_url: String,
    /// Schema namespace; meaningful for the server dialect only.
    pub db_schema: String,
    /// Block-stream endpoint, consumed by the transport collaborator.
    pub grpc_addr: String,
    pub log_level: LogLevel,
    pub spec_file: Option<PathBuf>,
    pub spec_dir: Option<PathBuf>,
    pub abi_file: Option<PathBuf>,
    pub abi_dir: Option<PathBuf>,
    /// Also record whole-block and whole-tx raw JSON rows.
    pub db_block_tx: bool,
}

pub enum ConfigError {
    SpecSource,
    AbiSource,
    SchemaWithEmbedded,
    UnknownAdapter(String),
    UnknownLogLevel(String),
}

impl std::fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SpecSource => {
                write!(f, "One of spec-file or spec-dir must be provided, but not both")
            }
            ConfigError::AbiSource => {
                write!(f, "One of abi-file or abi-dir must be provided, but not both")
            }
            ConfigError::SchemaWithEmbedded => {
                write!(f, "A schema namespace only applies to the server dialect")
            }
            ConfigError::UnknownAdapter(value) => {
                write!(f, "Unknown database adapter: {value}")
            }
            ConfigError::UnknownLogLevel(value) => {
                write!(f, "Unknown log level: {value}")
            }
        }
    }
}

impl Config {
    pub fn new(db_adapter: DbAdapterKind, db_url: &str) -> Config {
        Config {
            db_adapter,
            db_url: db_url.to_string(),
            db_schema: String::new(),
            grpc_addr: "localhost:10997".to_string(),
            log_level: LogLevel::default(),
            spec_file: None,
            spec_dir: None,
            abi_file: None,
            abi_dir: None,
            db_block_tx: false,
        }
    }

    pub fn with_schema(mut self, db_schema: &str) -> Config {
        self.db_schema = db_schema.to_string();

        self
    }

    pub fn with_grpc_addr(mut self, grpc_addr: &str) -> Config {
        self.grpc_addr = grpc_addr.to_string();

        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Config {
        self.log_level = log_level;

        self
    }

    pub fn with_spec_file(mut self, spec_file: impl Into<PathBuf>) -> Config {
        self.spec_file = Some(spec_file.into());

        self
    }

    pub fn with_spec_dir(mut self, spec_dir: impl Into<PathBuf>) -> Config {
        self.spec_dir = Some(spec_dir.into());

        self
    }

    pub fn with_abi_file(mut self, abi_file: impl Into<PathBuf>) -> Config {
        self.abi_file = Some(abi_file.into());

        self
    }

    pub fn with_abi_dir(mut self, abi_dir: impl Into<PathBuf>) -> Config {
        self.abi_dir = Some(abi_dir.into());

        self
    }

    pub fn with_block_tx(mut self) -> Config {
        self.db_block_tx = true;

        self
    }

    /// Walks every option field and rejects inconsistent combinations before
    /// anything is loaded or opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spec_source()?;
        self.abi_source()?;

        if self.db_adapter == DbAdapterKind::Sqlite && !self.db_schema.is_empty() {
            return Err(ConfigError::SchemaWithEmbedded);
        }

        Ok(())
    }

    pub fn spec_source(&self) -> Result<SpecSource, ConfigError> {
        match (&self.spec_file, &self.spec_dir) {
            (Some(file), None) => Ok(SpecSource::File(file.clone())),
            (None, Some(dir)) => Ok(SpecSource::Dir(dir.clone())),
            _ => Err(ConfigError::SpecSource),
        }
    }

    pub fn abi_source(&self) -> Result<SpecSource, ConfigError> {
        match (&self.abi_file, &self.abi_dir) {
            (Some(file), None) => Ok(SpecSource::File(file.clone())),
            (None, Some(dir)) => Ok(SpecSource::Dir(dir.clone())),
            _ => Err(ConfigError::AbiSource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exactly_one_spec_source() {
        let config = Config::new(DbAdapterKind::Sqlite, ":memory:")
            .with_abi_file("abi.json");
        assert!(matches!(config.validate(), Err(ConfigError::SpecSource)));

        let config = config.with_spec_file("spec.json").with_spec_dir("specs");
        assert!(matches!(config.validate(), Err(ConfigError::SpecSource)));
    }

    #[test]
    fn requires_exactly_one_abi_source() {
        let config = Config::new(DbAdapterKind::Sqlite, ":memory:")
            .with_spec_file("spec.json");

        assert!(matches!(config.validate(), Err(ConfigError::AbiSource)));
    }

    #[test]
    fn rejects_a_schema_for_the_embedded_dialect() {
        let config = Config::new(DbAdapterKind::Sqlite, ":memory:")
            .with_spec_file("spec.json")
            .with_abi_file("abi.json")
            .with_schema("vent");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::SchemaWithEmbedded)
        ));
    }

    #[test]
    fn accepts_a_complete_configuration() {
        let config = Config::new(DbAdapterKind::Postgres, "postgres://localhost/vent")
            .with_schema("vent")
            .with_spec_dir("specs")
            .with_abi_dir("abis");

        assert!(config.validate().is_ok());
        assert_eq!(config.spec_source().unwrap(), SpecSource::Dir("specs".into()));
    }

    #[test]
    fn parses_adapter_kinds_and_log_levels() {
        assert_eq!("postgres".parse::<DbAdapterKind>().unwrap(), DbAdapterKind::Postgres);
        assert_eq!("sqlite".parse::<DbAdapterKind>().unwrap(), DbAdapterKind::Sqlite);
        assert!("mysql".parse::<DbAdapterKind>().is_err());

        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(
            LogLevel::Warn.as_tracing_level(),
            tracing::Level::WARN
        );
        assert!("trace".parse::<LogLevel>().is_err());
    }
}
