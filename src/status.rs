//! Instance status probing via `pg_ctl status`.
//!
//! Probing never fails the run. If the status command cannot be executed the
//! instance is reported as `Unknown`, which the workflow treats like
//! `NotRunning`.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::config::{InstanceConfig, UpgradeConfig};
use crate::runner::{CommandOutput, CommandRunner, Shell};
use crate::tools;

/// Marker printed by `pg_ctl status` for a live postmaster
const RUNNING_MARKER: &str = "server is running";

/// pg_ctl exit code for "no accessible data directory"
const PG_CTL_NO_DATA_DIR: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running { pid: Option<u32> },
    NotRunning,
    /// Status could not be determined; treated as not running
    Unknown,
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { pid: Some(pid) } => write!(f, "running (PID {})", pid),
            Self::Running { pid: None } => write!(f, "running"),
            Self::NotRunning => write!(f, "not running"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status of both installations, taken once at startup and never refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterStatus {
    pub old: InstanceStatus,
    pub new: InstanceStatus,
}

fn pid_regex() -> &'static Regex {
    static PID: OnceLock<Regex> = OnceLock::new();
    PID.get_or_init(|| {
        Regex::new(r"server is running \(PID: (\d+)\)").expect("PID regex is valid")
    })
}

/// Classify a finished `pg_ctl status` call
pub fn classify(output: &CommandOutput) -> InstanceStatus {
    if output.stdout.contains(RUNNING_MARKER) {
        let pid = pid_regex()
            .captures(&output.stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        return InstanceStatus::Running { pid };
    }
    if output.code == Some(PG_CTL_NO_DATA_DIR) || output.code.is_none() {
        return InstanceStatus::Unknown;
    }
    InstanceStatus::NotRunning
}

pub async fn probe<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
) -> InstanceStatus {
    match shell.run(&tools::pg_ctl_status(instance)).await {
        Ok(output) => {
            let status = classify(&output);
            if status == InstanceStatus::Unknown {
                shell.output.warn(&format!(
                    "Could not determine status of {}: {}",
                    instance.data_dir.display(),
                    output.diagnostics()
                ));
            }
            status
        }
        Err(e) => {
            shell.output.warn(&format!(
                "Could not determine status of {}: {:#}",
                instance.data_dir.display(),
                e
            ));
            InstanceStatus::Unknown
        }
    }
}

/// Probe old then new installation
pub async fn probe_cluster<R: CommandRunner>(
    shell: &Shell<'_, R>,
    config: &UpgradeConfig,
) -> ClusterStatus {
    let old = probe(shell, &config.old).await;
    let new = probe(shell, &config.new).await;
    ClusterStatus { old, new }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MajorVersion;
    use crate::output::Output;
    use crate::runner::fake::{failed, ok, ScriptedRunner};
    use std::path::PathBuf;

    fn instance() -> InstanceConfig {
        InstanceConfig {
            data_dir: PathBuf::from("/data/14"),
            bin_dir: PathBuf::from("/usr/lib/postgresql/14/bin"),
            port: 5432,
            version: MajorVersion {
                major: 14,
                minor: 0,
            },
        }
    }

    #[test]
    fn test_classify_running_with_pid() {
        let out = ok("pg_ctl: server is running (PID: 4242)\n/usr/lib/postgresql/14/bin/postgres \"-D\" \"/data/14\"\n");
        assert_eq!(classify(&out), InstanceStatus::Running { pid: Some(4242) });
        assert!(classify(&out).is_running());
    }

    #[test]
    fn test_classify_running_without_pid() {
        let out = ok("pg_ctl: server is running\n");
        assert_eq!(classify(&out), InstanceStatus::Running { pid: None });
    }

    #[test]
    fn test_classify_not_running() {
        let mut out = failed(3, "");
        out.stdout = "pg_ctl: no server running\n".into();
        assert_eq!(classify(&out), InstanceStatus::NotRunning);
        assert!(!classify(&out).is_running());
    }

    #[test]
    fn test_classify_missing_data_dir_is_unknown() {
        let out = failed(
            4,
            "pg_ctl: directory \"/data/14\" is not a database cluster directory",
        );
        assert_eq!(classify(&out), InstanceStatus::Unknown);
        assert!(!InstanceStatus::Unknown.is_running());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            InstanceStatus::Running { pid: Some(7) }.to_string(),
            "running (PID 7)"
        );
        assert_eq!(InstanceStatus::NotRunning.to_string(), "not running");
        assert_eq!(InstanceStatus::Unknown.to_string(), "unknown");
    }

    #[tokio::test]
    async fn test_probe_spawn_failure_degrades_to_unknown() {
        let runner = ScriptedRunner::new(|_| anyhow::bail!("No such file or directory"));
        let output = Output::new(true, false);
        let shell = Shell::new(&runner, &output);
        assert_eq!(probe(&shell, &instance()).await, InstanceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_probe_runs_pg_ctl_status() {
        let runner = ScriptedRunner::new(|_| Ok(ok("pg_ctl: server is running (PID: 10)")));
        let output = Output::new(true, false);
        let shell = Shell::new(&runner, &output);
        let status = probe(&shell, &instance()).await;
        assert_eq!(status, InstanceStatus::Running { pid: Some(10) });
        assert_eq!(runner.call_lines(), vec!["pg_ctl status -D /data/14"]);
    }
}
