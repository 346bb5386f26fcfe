//! pg_upgrade invocation and the post-upgrade sequence.
//!
//! After a successful transform in a mutating mode:
//! 1. append `port = <new port>` to the new cluster's postgresql.conf
//! 2. start the new instance
//! 3. vacuumdb --analyze-in-stages (bracketed by the maintenance checkpoints)
//! 4. recreate configured extensions
//! 5. run update_extensions.sql if present
//!
//! A failed transform or a failed start halts the chain. Maintenance,
//! extension and script failures are reported and the chain continues.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::config::UpgradeConfig;
use crate::extensions::{self, ExtensionReport};
use crate::runner::{CommandRunner, Shell};
use crate::timing::TimingRecord;
use crate::tools::{self, MAINTENANCE_DB, NEW_SERVER_LOG};

/// Outcome of the optional post-upgrade SQL script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    NotPresent,
    Succeeded,
    Failed,
}

/// What the post-upgrade sequence did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    pub maintenance_ok: bool,
    /// `None` when no extensions were configured or the database list failed
    pub extensions: Option<ExtensionReport>,
    pub script: ScriptOutcome,
}

impl UpgradeOutcome {
    /// Any non-fatal step failed
    pub fn has_failures(&self) -> bool {
        !self.maintenance_ok
            || self.script == ScriptOutcome::Failed
            || self.extensions.as_ref().is_some_and(|r| !r.is_clean())
    }
}

/// Run pg_upgrade in the configured mode. Any non-zero exit is fatal.
pub async fn run_transform<R: CommandRunner>(
    shell: &Shell<'_, R>,
    config: &UpgradeConfig,
) -> Result<()> {
    shell.output.step(&format!(
        "Running pg_upgrade ({}) {} -> {}...",
        config.mode, config.old.version, config.new.version
    ));
    let output = shell
        .run(&tools::pg_upgrade(config))
        .await
        .context("Failed to run pg_upgrade")?;
    if !output.success() {
        bail!(
            "pg_upgrade failed (exit code {}). See pg_upgrade_output.d in {} for details.",
            output.code_or_signal(),
            config.work_dir.display()
        );
    }
    shell.output.success("pg_upgrade finished successfully.");
    Ok(())
}

/// Append a port directive as one new line, keeping the file's last line intact.
pub fn append_port_directive(config_file: &Path, port: u16) -> Result<()> {
    let existing = fs::read_to_string(config_file)
        .with_context(|| format!("Failed to read {}", config_file.display()))?;
    let mut file = OpenOptions::new()
        .append(true)
        .open(config_file)
        .with_context(|| format!("Failed to open {}", config_file.display()))?;
    let separator = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{}port = {}", separator, port)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(())
}

/// Everything after a successful transform in clone/link/copy mode.
pub async fn post_upgrade<R: CommandRunner>(
    shell: &Shell<'_, R>,
    config: &UpgradeConfig,
    timing: &mut TimingRecord,
) -> Result<UpgradeOutcome> {
    let output = shell.output;

    append_port_directive(&config.new.config_file(), config.new.port)?;
    output.info(&format!(
        "Set port = {} in {}",
        config.new.port,
        config.new.config_file().display()
    ));

    output.step("Starting new instance...");
    let server_log = config.work_dir.join(NEW_SERVER_LOG);
    let started = shell
        .run(&tools::pg_ctl_start(&config.new, &server_log))
        .await
        .context("Failed to start new instance")?;
    if !started.success() {
        bail!(
            "Failed to start new instance (exit code {}): {}\nServer log: {}",
            started.code_or_signal(),
            started.diagnostics(),
            server_log.display()
        );
    }
    output.success(&format!("New instance running on port {}.", config.new.port));

    output.step(&format!(
        "Refreshing statistics (vacuumdb, {} jobs)...",
        config.jobs
    ));
    timing.mark_pre_maintenance();
    let maintenance_ok = match shell.run(&tools::vacuumdb_analyze(config)).await {
        Ok(out) if out.success() => true,
        Ok(out) => {
            output.warn(&format!(
                "vacuumdb failed (exit code {}); statistics may be incomplete.",
                out.code_or_signal()
            ));
            false
        }
        Err(e) => {
            output.warn(&format!("vacuumdb failed: {:#}", e));
            false
        }
    };
    timing.mark_post_maintenance();

    let extensions = if config.extensions.is_empty() {
        None
    } else {
        output.step(&format!("Creating extensions: {}", config.extensions));
        match extensions::create_extensions(shell, &config.new, &config.user, &config.extensions)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                output.warn(&format!("Extension creation skipped: {:#}", e));
                None
            }
        }
    };

    let script = run_post_upgrade_script(shell, config).await;

    Ok(UpgradeOutcome {
        maintenance_ok,
        extensions,
        script,
    })
}

/// Run update_extensions.sql from the work directory, if it exists
async fn run_post_upgrade_script<R: CommandRunner>(
    shell: &Shell<'_, R>,
    config: &UpgradeConfig,
) -> ScriptOutcome {
    let script = config.post_upgrade_script();
    if !script.is_file() {
        return ScriptOutcome::NotPresent;
    }

    shell
        .output
        .step(&format!("Running {}...", script.display()));
    let cmd = tools::psql_file(&config.new, &config.user, MAINTENANCE_DB, &script);
    match shell.run(&cmd).await {
        Ok(out) if out.success() => ScriptOutcome::Succeeded,
        Ok(out) => {
            shell.output.warn(&format!(
                "{} failed (exit code {})",
                script.display(),
                out.code_or_signal()
            ));
            ScriptOutcome::Failed
        }
        Err(e) => {
            shell
                .output
                .warn(&format!("{} failed: {:#}", script.display(), e));
            ScriptOutcome::Failed
        }
    }
}
