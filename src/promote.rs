//! Promotion of a standby old cluster before the upgrade.
//!
//! pg_upgrade cannot run against a server in recovery. When the old instance
//! is a running standby it is promoted, configured extensions are dropped from
//! it, and both instances are shut down. A running primary is left untouched.

use colored::Colorize;
use std::fmt;

use crate::config::{InstanceConfig, UpgradeConfig};
use crate::extensions::{self, ExtensionReport};
use crate::runner::{CommandRunner, Shell};
use crate::sql;
use crate::status::{ClusterStatus, InstanceStatus};
use crate::tools::{self, MAINTENANCE_DB};

/// Replication role reported by `pg_is_in_recovery()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Primary,
    Standby,
    /// Query failed or returned something unexpected; treated as primary
    Unknown,
}

impl ReplicationRole {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "t" | "true" | "on" => Self::Standby,
            "f" | "false" | "off" => Self::Primary,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Standby => write!(f, "standby (in recovery)"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a `pg_ctl stop` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    /// Status flag said the instance was not running
    Skipped,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Old instance was not running (or its status was unknown)
    NotRunning,
    /// Old instance is a running primary and stays running
    LeftRunning { role: ReplicationRole },
    /// `pg_ctl promote` failed; nothing else was attempted
    PromoteFailed,
    Promoted {
        /// `None` when the database list could not be read
        dropped: Option<ExtensionReport>,
        new_stopped: StopResult,
        old_stopped: StopResult,
    },
}

pub async fn query_role<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
) -> ReplicationRole {
    match tools::query_lines(shell, instance, user, MAINTENANCE_DB, sql::IN_RECOVERY_SQL).await {
        Ok(lines) => lines
            .first()
            .map(|l| ReplicationRole::parse(l))
            .unwrap_or(ReplicationRole::Unknown),
        Err(e) => {
            shell
                .output
                .warn(&format!("Could not query replication role: {:#}", e));
            ReplicationRole::Unknown
        }
    }
}

/// Promote-then-stop sequence for the old cluster.
///
/// Stops use the status flags captured at startup: new instance first, then
/// old, each only if it was running.
pub async fn promote_if_standby<R: CommandRunner>(
    shell: &Shell<'_, R>,
    config: &UpgradeConfig,
    status: &ClusterStatus,
) -> PromotionOutcome {
    let output = shell.output;

    if !status.old.is_running() {
        if status.old == InstanceStatus::Unknown {
            output.warn("Old instance status unknown; assuming it is not running.");
        }
        output.info("Old instance is not running; no promotion needed.");
        return PromotionOutcome::NotRunning;
    }

    let role = query_role(shell, &config.old, &config.user).await;
    output.info(&format!("Old instance role: {}", role));

    if role != ReplicationRole::Standby {
        output.warn(&format!(
            "Old instance on port {} is running as {} and will not be stopped; \
             pg_upgrade requires both clusters to be shut down.",
            config.old.port, role
        ));
        if !config.extensions.is_empty() {
            output.warn(&format!(
                "Extensions ({}) are only dropped after promoting a standby; skipping.",
                config.extensions
            ));
        }
        return PromotionOutcome::LeftRunning { role };
    }

    output.step("Promoting old instance...");
    match shell.run(&tools::pg_ctl_promote(&config.old)).await {
        Ok(out) if out.success() => output.success("  Promoted."),
        Ok(out) => {
            output.error(&format!(
                "pg_ctl promote failed (exit code {}): {}",
                out.code_or_signal(),
                out.diagnostics()
            ));
            return PromotionOutcome::PromoteFailed;
        }
        Err(e) => {
            output.error(&format!("pg_ctl promote failed: {:#}", e));
            return PromotionOutcome::PromoteFailed;
        }
    }

    let dropped = if config.extensions.is_empty() {
        Some(ExtensionReport::default())
    } else {
        output.step(&format!("Dropping extensions: {}", config.extensions));
        match extensions::drop_extensions(shell, &config.old, &config.user, &config.extensions)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                output.warn(&format!("Extension drop skipped: {:#}", e));
                None
            }
        }
    };

    output.step("Stopping instances...");
    let new_stopped = stop_if_running(shell, &config.new, status.new, "new").await;
    let old_stopped = stop_if_running(shell, &config.old, status.old, "old").await;

    PromotionOutcome::Promoted {
        dropped,
        new_stopped,
        old_stopped,
    }
}

async fn stop_if_running<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    status: InstanceStatus,
    label: &str,
) -> StopResult {
    if !status.is_running() {
        return StopResult::Skipped;
    }
    match shell.run(&tools::pg_ctl_stop(instance)).await {
        Ok(out) if out.success() => {
            shell
                .output
                .info(&format!("  {} {} instance stopped", "✓".green(), label));
            StopResult::Stopped
        }
        Ok(out) => {
            shell.output.warn(&format!(
                "  Failed to stop {} instance (exit code {}): {}",
                label,
                out.code_or_signal(),
                out.diagnostics()
            ));
            StopResult::Failed
        }
        Err(e) => {
            shell
                .output
                .warn(&format!("  Failed to stop {} instance: {:#}", label, e));
            StopResult::Failed
        }
    }
}
