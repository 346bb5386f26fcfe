//! Upgrade workflow for `check`, `clone`, `link` and `copy`.
//!
//! probe status -> confirm (mutating only) -> promote standby -> pg_upgrade
//! -> post-upgrade sequence (mutating only) -> summary log

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use crate::config::UpgradeConfig;
use crate::confirm::Confirmation;
use crate::executor::{self, ScriptOutcome, UpgradeOutcome};
use crate::output::Output;
use crate::promote::{self, PromotionOutcome};
use crate::runner::{CommandRunner, Shell};
use crate::status;
use crate::timing::{format_elapsed, TimingRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Operator declined at the prompt; nothing was changed
    Cancelled,
    Completed {
        summary_log: PathBuf,
        promotion: Option<PromotionOutcome>,
        /// `None` in check mode
        upgrade: Option<UpgradeOutcome>,
    },
}

pub async fn upgrade<R: CommandRunner, C: Confirmation>(
    config: &UpgradeConfig,
    runner: &R,
    confirmation: &C,
    output: &Output,
) -> Result<RunOutcome> {
    let mut timing = TimingRecord::start();
    let shell = Shell::new(runner, output);

    print_plan(config, output);

    output.step("Checking instance status...");
    let cluster = status::probe_cluster(&shell, config).await;
    output.info(&format!(
        "  Old instance (port {}): {}",
        config.old.port, cluster.old
    ));
    output.info(&format!(
        "  New instance (port {}): {}",
        config.new.port, cluster.new
    ));

    let promotion = if config.mode.is_mutating() {
        let prompt = format!(
            "Upgrade {} (PostgreSQL {}) to {} (PostgreSQL {}) in {} mode?",
            config.old.data_dir.display(),
            config.old.version,
            config.new.data_dir.display(),
            config.new.version,
            config.mode
        );
        output.flush();
        if !confirmation.confirm(&prompt)? {
            output.info("Cancelled.");
            return Ok(RunOutcome::Cancelled);
        }
        Some(promote::promote_if_standby(&shell, config, &cluster).await)
    } else {
        None
    };

    executor::run_transform(&shell, config).await?;

    let upgrade = if config.mode.is_mutating() {
        Some(executor::post_upgrade(&shell, config, &mut timing).await?)
    } else {
        output.success("Check complete. No changes were made to either cluster.");
        None
    };

    timing.finish();
    let summary_log = config.summary_log_path();
    timing.write_report(&summary_log)?;

    if let Some(outcome) = &upgrade {
        print_outcome(outcome, output);
    }
    let summary = timing.summary();
    output.info(&format!("Total time: {}", format_elapsed(summary.total_secs)));
    if timing.maintenance_ran() {
        output.info(&format!(
            "Maintenance time: {}",
            format_elapsed(summary.maintenance_secs)
        ));
    }
    output.info(&format!("Summary written to {}", summary_log.display()));

    Ok(RunOutcome::Completed {
        summary_log,
        promotion,
        upgrade,
    })
}

fn print_plan(config: &UpgradeConfig, output: &Output) {
    output.step(&format!(
        "pgshift {}: PostgreSQL {} -> {}",
        config.mode, config.old.version, config.new.version
    ));
    output.info(&format!(
        "  Old:        {} (port {}, bin {})",
        config.old.data_dir.display(),
        config.old.port,
        config.old.bin_dir.display()
    ));
    output.info(&format!(
        "  New:        {} (port {}, bin {})",
        config.new.data_dir.display(),
        config.new.port,
        config.new.bin_dir.display()
    ));
    output.info(&format!("  User:       {}", config.user));
    if config.extensions.is_empty() {
        output.info("  Extensions: (none)");
    } else {
        output.info(&format!(
            "  Extensions: {} ({})",
            config.extensions,
            config.extensions.len()
        ));
    }
    output.info(&format!("  Jobs:       {}", config.jobs));
}

fn print_outcome(outcome: &UpgradeOutcome, output: &Output) {
    if !outcome.has_failures() {
        output.success("Upgrade complete.");
        return;
    }

    output.warn("Upgrade complete, with problems:");
    if !outcome.maintenance_ok {
        output.warn("  - vacuumdb failed; run `vacuumdb --all --analyze-in-stages` manually");
    }
    if let Some(report) = &outcome.extensions {
        for failure in &report.failures {
            output.warn(&format!(
                "  - extension {} in {}: {}",
                failure.extension, failure.database, failure.message
            ));
        }
    }
    if outcome.script == ScriptOutcome::Failed {
        output.warn(&format!(
            "  - {} failed",
            crate::config::POST_UPGRADE_SCRIPT.bold()
        ));
    }
}
