use anyhow::{bail, Result};
use clap::Args;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::extensions::ExtensionSet;

/// Default config file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "pgshift.toml";

/// Summary log written at the end of every completed run
pub const SUMMARY_LOG_FILE: &str = "pg_upgrade_summary.log";

/// Optional SQL script run against the new cluster after extensions are recreated
pub const POST_UPGRADE_SCRIPT: &str = "update_extensions.sql";

/// Configuration error: bad or missing parameters. Exits with usage guidance.
#[derive(Debug)]
pub struct UsageError {
    pub message: String,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UsageError {}

pub fn usage_error(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(UsageError {
        message: message.into(),
    })
}

/// pg_upgrade transfer mode, taken from the command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeMode {
    /// Dry validation only, never touches either cluster
    Check,
    Clone,
    Link,
    Copy,
}

impl UpgradeMode {
    /// Everything except `check` changes the clusters and requires confirmation
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Check)
    }

    /// Flag passed to pg_upgrade
    pub fn pg_upgrade_flag(&self) -> &'static str {
        match self {
            Self::Check => "--check",
            Self::Clone => "--clone",
            Self::Link => "--link",
            Self::Copy => "--copy",
        }
    }
}

impl fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check => write!(f, "check"),
            Self::Clone => write!(f, "clone"),
            Self::Link => write!(f, "link"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

/// PostgreSQL major version. Below 10 the major is two components (9.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MajorVersion {
    pub major: u32,
    pub minor: u32,
}

impl FromStr for MajorVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('.');
        let major: u32 = match parts.next().map(str::parse) {
            Some(Ok(n)) => n,
            _ => bail!("Invalid PostgreSQL version '{}'", s),
        };
        let minor = if major < 10 {
            match parts.next() {
                Some(p) => p
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid PostgreSQL version '{}'", s))?,
                None => 0,
            }
        } else {
            0
        };
        Ok(Self { major, minor })
    }
}

impl fmt::Display for MajorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.major < 10 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}", self.major)
        }
    }
}

/// Upgrade parameters accepted by every upgrade command
#[derive(Args, Debug, Default, Clone)]
pub struct UpgradeArgs {
    /// Data directory of the old cluster
    #[arg(long = "old-path", value_name = "DIR")]
    pub old_path: Option<PathBuf>,

    /// Data directory of the new (initdb'd) cluster
    #[arg(long = "new-path", value_name = "DIR")]
    pub new_path: Option<PathBuf>,

    /// Binary directory of the old PostgreSQL version
    #[arg(long = "old-bin-path", value_name = "DIR")]
    pub old_bin_path: Option<PathBuf>,

    /// Binary directory of the new PostgreSQL version
    #[arg(long = "new-bin-path", value_name = "DIR")]
    pub new_bin_path: Option<PathBuf>,

    /// Port of the old cluster
    #[arg(long = "old-port", value_name = "PORT")]
    pub old_port: Option<u16>,

    /// Port of the new cluster
    #[arg(long = "new-port", value_name = "PORT")]
    pub new_port: Option<u16>,

    /// Administrative (superuser) role used for every connection (falls back to PGUSER)
    #[arg(long = "pguser", value_name = "USER")]
    pub pguser: Option<String>,

    /// Old PostgreSQL major version (e.g. 14)
    #[arg(long = "pg-old-version", value_name = "VERSION")]
    pub pg_old_version: Option<String>,

    /// New PostgreSQL major version (e.g. 16)
    #[arg(long = "pg-new-version", value_name = "VERSION")]
    pub pg_new_version: Option<String>,

    /// Extensions to drop before and recreate after the upgrade (comma-separated)
    #[arg(long, value_name = "EXT1,EXT2,...")]
    pub extensions: Option<String>,

    /// Parallel jobs for vacuumdb (default: number of CPU cores)
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Directory holding update_extensions.sql and the summary log (default: current directory)
    #[arg(long = "work-dir", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Config file structure loaded from pgshift.toml
#[derive(Deserialize, Default, Debug)]
pub struct ConfigFile {
    pub old: Option<InstanceSection>,
    pub new: Option<InstanceSection>,
    pub upgrade: Option<UpgradeSection>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct InstanceSection {
    pub data_dir: Option<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub version: Option<VersionValue>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct UpgradeSection {
    pub user: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub jobs: Option<usize>,
    pub work_dir: Option<PathBuf>,
}

/// `version = 16` and `version = "16"` are both accepted
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum VersionValue {
    Number(u32),
    Text(String),
}

impl VersionValue {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

impl ConfigFile {
    /// Load config from file, or return default if no config exists.
    /// If an explicit path is provided via --config, it MUST exist (error if not).
    /// If no path is provided, check ./pgshift.toml (use default if not found).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(usage_error(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                p
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    default_path
                } else {
                    return Ok(ConfigFile::default());
                }
            }
        };

        let contents = fs::read_to_string(config_path)?;
        toml::from_str(&contents).map_err(|e| {
            usage_error(format!("Failed to parse {}: {}", config_path.display(), e))
        })
    }
}

/// One side of the upgrade (old or new installation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub data_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub port: u16,
    pub version: MajorVersion,
}

impl InstanceConfig {
    /// Path of a binary from this installation
    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    /// postgresql.conf inside the data directory
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("postgresql.conf")
    }
}

/// Fully resolved, validated parameters for one run. Read-only after resolution.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    pub mode: UpgradeMode,
    pub old: InstanceConfig,
    pub new: InstanceConfig,
    pub user: String,
    pub extensions: ExtensionSet,
    pub jobs: usize,
    pub work_dir: PathBuf,
}

impl UpgradeConfig {
    /// Merge CLI flags, environment and config file into a validated config.
    ///
    /// Resolution order per field: CLI > environment (PGUSER only) > config file.
    /// Fails before any external command runs if a required field is missing.
    pub fn resolve(
        mode: UpgradeMode,
        args: &UpgradeArgs,
        file: &ConfigFile,
        env_user: Option<String>,
    ) -> Result<Self> {
        let old_file = file.old.clone().unwrap_or_default();
        let new_file = file.new.clone().unwrap_or_default();
        let upgrade_file = file.upgrade.clone().unwrap_or_default();

        let old_path = non_empty_path(args.old_path.clone().or(old_file.data_dir));
        let new_path = non_empty_path(args.new_path.clone().or(new_file.data_dir));
        let old_bin = non_empty_path(args.old_bin_path.clone().or(old_file.bin_dir));
        let new_bin = non_empty_path(args.new_bin_path.clone().or(new_file.bin_dir));
        let old_port = args.old_port.or(old_file.port);
        let new_port = args.new_port.or(new_file.port);
        let user = non_empty(
            args.pguser
                .clone()
                .or(env_user)
                .or(upgrade_file.user.clone()),
        );
        let old_version = non_empty(
            args.pg_old_version
                .clone()
                .or(old_file.version.map(VersionValue::into_string)),
        );
        let new_version = non_empty(
            args.pg_new_version
                .clone()
                .or(new_file.version.map(VersionValue::into_string)),
        );

        let mut missing = Vec::new();
        if old_path.is_none() {
            missing.push("--old-path");
        }
        if new_path.is_none() {
            missing.push("--new-path");
        }
        if old_bin.is_none() {
            missing.push("--old-bin-path");
        }
        if new_bin.is_none() {
            missing.push("--new-bin-path");
        }
        if old_port.is_none() {
            missing.push("--old-port");
        }
        if new_port.is_none() {
            missing.push("--new-port");
        }
        if user.is_none() {
            missing.push("--pguser");
        }
        if old_version.is_none() {
            missing.push("--pg-old-version");
        }
        if new_version.is_none() {
            missing.push("--pg-new-version");
        }

        let (
            Some(old_path),
            Some(new_path),
            Some(old_bin),
            Some(new_bin),
            Some(old_port),
            Some(new_port),
            Some(user),
            Some(old_version),
            Some(new_version),
        ) = (
            old_path,
            new_path,
            old_bin,
            new_bin,
            old_port,
            new_port,
            user,
            old_version,
            new_version,
        )
        else {
            return Err(usage_error(format!(
                "Missing required parameter{}: {}",
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            )));
        };

        let old_major: MajorVersion = old_version
            .parse()
            .map_err(|e: anyhow::Error| usage_error(format!("--pg-old-version: {}", e)))?;
        let new_major: MajorVersion = new_version
            .parse()
            .map_err(|e: anyhow::Error| usage_error(format!("--pg-new-version: {}", e)))?;
        if new_major <= old_major {
            return Err(usage_error(format!(
                "New version ({}) must be newer than old version ({})",
                new_major, old_major
            )));
        }

        if old_port == 0 || new_port == 0 {
            return Err(usage_error("Ports must be between 1 and 65535"));
        }
        if old_port == new_port {
            return Err(usage_error(format!(
                "Old and new clusters cannot share port {}",
                old_port
            )));
        }

        let jobs = args
            .jobs
            .or(upgrade_file.jobs)
            .unwrap_or_else(default_jobs);
        if jobs == 0 {
            return Err(usage_error("--jobs must be at least 1"));
        }

        let extensions = match &args.extensions {
            Some(list) => ExtensionSet::parse(list),
            None => ExtensionSet::from_names(upgrade_file.extensions.unwrap_or_default()),
        };

        let work_dir = args
            .work_dir
            .clone()
            .or(upgrade_file.work_dir)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Ok(Self {
            mode,
            old: InstanceConfig {
                data_dir: old_path,
                bin_dir: old_bin,
                port: old_port,
                version: old_major,
            },
            new: InstanceConfig {
                data_dir: new_path,
                bin_dir: new_bin,
                port: new_port,
                version: new_major,
            },
            user,
            extensions,
            jobs,
            work_dir,
        })
    }

    pub fn summary_log_path(&self) -> PathBuf {
        self.work_dir.join(SUMMARY_LOG_FILE)
    }

    pub fn post_upgrade_script(&self) -> PathBuf {
        self.work_dir.join(POST_UPGRADE_SCRIPT)
    }
}

/// Number of CPU cores, used as the default vacuumdb parallelism
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}
