//! The configuration document accepted by every subcommand, plus the
//! defaulting and validation rules from §4.9/§6 of the specification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::namespace::Include;

pub const MAX_BLOCK_SIZE: i64 = 10_000;
pub const DEFAULT_BLOCK_SIZE: i64 = 10_000;
pub const MAX_NUMBER_WORKERS: u32 = 16;
pub const DEFAULT_NUMBER_WORKERS: u32 = 8;
pub const DEFAULT_PORT: u16 = 3629;
pub const DEFAULT_SPOOL: &str = "./spool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    All,
    Config,
    Data,
    DataOnly,
    Index,
    Oplog,
}

/// How much of the config phase a command engages: `index` replays only
/// index metadata, `config`/`all` replay collections and indexes both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    None,
    IndexesOnly,
    Full,
}

impl Command {
    /// Which of the data and oplog phases this command engages.
    pub fn phases(&self) -> (bool, bool) {
        match self {
            Command::All => (true, true),
            Command::Config => (false, false),
            Command::Data => (true, true),
            Command::DataOnly => (true, false),
            Command::Index => (false, false),
            Command::Oplog => (false, true),
        }
    }

    pub fn config_scope(&self) -> ConfigScope {
        match self {
            Command::All | Command::Config => ConfigScope::Full,
            Command::Index => ConfigScope::IndexesOnly,
            Command::Data | Command::DataOnly | Command::Oplog => ConfigScope::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub command: Command,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub includes: Vec<Include>,
    #[serde(default)]
    pub drop: bool,
    #[serde(default)]
    pub block: Option<i64>,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "staging")]
    pub spool: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub yes: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("command is required")]
    MissingCommand,
    #[error("source and target must have valid connection strings")]
    MissingEndpoints,
    #[error("number of workers must be between 1 and {MAX_NUMBER_WORKERS}")]
    TooManyWorkers,
    #[error("cannot set {{\"drop\": true}} when command is {0:?}")]
    DropWithDataCommand(Command),
    #[error("failed to parse configuration file: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A fully validated, defaulted configuration, ready to drive the orchestrator.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub command: Command,
    pub source: String,
    pub target: String,
    pub includes: Vec<Include>,
    pub drop: bool,
    pub block: i64,
    pub workers: u32,
    pub port: u16,
    pub spool: String,
    pub verbose: bool,
    pub yes: bool,
}

pub fn load_from_str(contents: &str) -> Result<MigrationConfig, ConfigError> {
    serde_json::from_str(contents).map_err(ConfigError::Parse)
}

pub fn load_from_file(path: &str) -> Result<MigrationConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    load_from_str(&contents)
}

/// Applies defaults and validates invariants, matching
/// `ValidateMigratorConfig` in the original tool.
pub fn validate(config: MigrationConfig) -> Result<ResolvedConfig, ConfigError> {
    if config.source.is_empty() || config.target.is_empty() {
        return Err(ConfigError::MissingEndpoints);
    }
    let workers = config.workers.unwrap_or(DEFAULT_NUMBER_WORKERS).max(1);
    if workers > MAX_NUMBER_WORKERS {
        return Err(ConfigError::TooManyWorkers);
    }
    if config.drop && matches!(config.command, Command::Data | Command::DataOnly) {
        return Err(ConfigError::DropWithDataCommand(config.command));
    }
    let block = match config.block {
        Some(b) if b > 0 => b,
        _ => DEFAULT_BLOCK_SIZE,
    }
    .min(MAX_BLOCK_SIZE);

    Ok(ResolvedConfig {
        command: config.command,
        source: config.source,
        target: config.target,
        includes: config.includes,
        drop: config.drop,
        block,
        workers,
        port: config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_PORT),
        spool: config
            .spool
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SPOOL.to_string()),
        verbose: config.verbose,
        yes: config.yes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let raw = MigrationConfig {
            command: Command::All,
            source: "mongodb://src".into(),
            target: "mongodb://tgt".into(),
            includes: vec![],
            drop: false,
            block: None,
            workers: None,
            port: None,
            spool: None,
            verbose: false,
            yes: false,
        };
        let resolved = validate(raw).unwrap();
        assert_eq!(resolved.block, DEFAULT_BLOCK_SIZE);
        assert_eq!(resolved.workers, DEFAULT_NUMBER_WORKERS);
        assert_eq!(resolved.port, DEFAULT_PORT);
        assert_eq!(resolved.spool, DEFAULT_SPOOL);
    }

    #[test]
    fn index_command_replays_indexes_without_the_data_or_oplog_phases() {
        assert_eq!(Command::Index.config_scope(), ConfigScope::IndexesOnly);
        assert_eq!(Command::Index.phases(), (false, false));
    }

    #[test]
    fn config_command_replays_collections_and_indexes_without_data() {
        assert_eq!(Command::Config.config_scope(), ConfigScope::Full);
        assert_eq!(Command::Config.phases(), (false, false));
    }

    #[test]
    fn data_only_command_skips_the_config_phase_and_the_oplog_tail() {
        assert_eq!(Command::DataOnly.config_scope(), ConfigScope::None);
        assert_eq!(Command::DataOnly.phases(), (true, false));
    }

    #[test]
    fn rejects_drop_with_data_only() {
        let raw = MigrationConfig {
            command: Command::DataOnly,
            source: "mongodb://src".into(),
            target: "mongodb://tgt".into(),
            includes: vec![],
            drop: true,
            block: None,
            workers: None,
            port: None,
            spool: None,
            verbose: false,
            yes: false,
        };
        assert!(matches!(
            validate(raw),
            Err(ConfigError::DropWithDataCommand(Command::DataOnly))
        ));
    }

    #[test]
    fn rejects_too_many_workers() {
        let raw = MigrationConfig {
            command: Command::All,
            source: "mongodb://src".into(),
            target: "mongodb://tgt".into(),
            includes: vec![],
            drop: false,
            block: None,
            workers: Some(32),
            port: None,
            spool: None,
            verbose: false,
            yes: false,
        };
        assert!(matches!(validate(raw), Err(ConfigError::TooManyWorkers)));
    }
}
