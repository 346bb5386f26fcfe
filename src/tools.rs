//! Invocations of the PostgreSQL server tools.
//!
//! Each builder returns a [`PgCommand`] pointing at the binary inside the
//! relevant installation's bin directory, so the old cluster is always driven
//! by old binaries and the new cluster by new ones.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::{InstanceConfig, UpgradeConfig};
use crate::runner::{CommandRunner, PgCommand, Shell};

/// Database used for catalog queries that are not per-database
pub const MAINTENANCE_DB: &str = "postgres";

/// Server log for the new instance started after the upgrade
pub const NEW_SERVER_LOG: &str = "pg_upgrade_new_server.log";

pub fn pg_ctl_status(instance: &InstanceConfig) -> PgCommand {
    PgCommand::new(instance.tool("pg_ctl"))
        .arg("status")
        .arg("-D")
        .path_arg(&instance.data_dir)
}

pub fn pg_ctl_promote(instance: &InstanceConfig) -> PgCommand {
    PgCommand::new(instance.tool("pg_ctl"))
        .arg("promote")
        .arg("-D")
        .path_arg(&instance.data_dir)
        .arg("-w")
}

pub fn pg_ctl_stop(instance: &InstanceConfig) -> PgCommand {
    PgCommand::new(instance.tool("pg_ctl"))
        .arg("stop")
        .arg("-D")
        .path_arg(&instance.data_dir)
        .arg("-m")
        .arg("fast")
        .arg("-w")
}

/// Start with a log file: without `-l` the postmaster would hold our
/// captured stdout open and the call would never return.
pub fn pg_ctl_start(instance: &InstanceConfig, log_file: &Path) -> PgCommand {
    PgCommand::new(instance.tool("pg_ctl"))
        .arg("start")
        .arg("-D")
        .path_arg(&instance.data_dir)
        .arg("-l")
        .path_arg(log_file)
        .arg("-w")
}

/// Unaligned, tuples-only psql call returning one value per line
pub fn psql_query(instance: &InstanceConfig, user: &str, database: &str, sql: &str) -> PgCommand {
    psql_base(instance, user, database)
        .arg("-A")
        .arg("-t")
        .arg("-c")
        .arg(sql)
}

/// Run a SQL file; output goes straight to the terminal
pub fn psql_file(instance: &InstanceConfig, user: &str, database: &str, file: &Path) -> PgCommand {
    psql_base(instance, user, database)
        .arg("-f")
        .path_arg(file)
        .inherit()
}

fn psql_base(instance: &InstanceConfig, user: &str, database: &str) -> PgCommand {
    PgCommand::new(instance.tool("psql"))
        .arg("-X")
        .arg("-q")
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-p")
        .arg(instance.port.to_string())
        .arg("-U")
        .arg(user)
        .arg("-d")
        .arg(database)
}

/// The version-upgrade transform, always taken from the new installation.
///
/// Runs inside the work directory because pg_upgrade writes its own output
/// directory relative to the cwd.
pub fn pg_upgrade(config: &UpgradeConfig) -> PgCommand {
    PgCommand::new(config.new.tool("pg_upgrade"))
        .arg("--old-datadir")
        .path_arg(&config.old.data_dir)
        .arg("--new-datadir")
        .path_arg(&config.new.data_dir)
        .arg("--old-bindir")
        .path_arg(&config.old.bin_dir)
        .arg("--new-bindir")
        .path_arg(&config.new.bin_dir)
        .arg("--old-port")
        .arg(config.old.port.to_string())
        .arg("--new-port")
        .arg(config.new.port.to_string())
        .arg("--username")
        .arg(&config.user)
        .arg("--old-options")
        .arg(config_file_override(&config.old))
        .arg("--new-options")
        .arg(config_file_override(&config.new))
        .arg(config.mode.pg_upgrade_flag())
        .current_dir(&config.work_dir)
        .inherit()
}

fn config_file_override(instance: &InstanceConfig) -> String {
    format!("-c config_file={}", instance.config_file().display())
}

/// Statistics refresh across every database of the new cluster
pub fn vacuumdb_analyze(config: &UpgradeConfig) -> PgCommand {
    PgCommand::new(config.new.tool("vacuumdb"))
        .arg("--all")
        .arg("--analyze-in-stages")
        .arg("--jobs")
        .arg(config.jobs.to_string())
        .arg("-p")
        .arg(config.new.port.to_string())
        .arg("-U")
        .arg(&config.user)
        .inherit()
}

/// Run a tuples-only query and return its non-empty output lines.
///
/// A non-zero psql exit becomes an error carrying psql's message.
pub async fn query_lines<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
    database: &str,
    sql: &str,
) -> Result<Vec<String>> {
    let output = shell
        .run(&psql_query(instance, user, database, sql))
        .await?;
    if !output.success() {
        bail!(
            "psql exited with code {}: {}",
            output.code_or_signal(),
            output.diagnostics()
        );
    }
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Run a statement whose output is not needed
pub async fn execute<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
    database: &str,
    sql: &str,
) -> Result<()> {
    query_lines(shell, instance, user, database, sql)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MajorVersion, UpgradeMode};
    use crate::extensions::ExtensionSet;
    use crate::output::Output;
    use crate::runner::fake::{failed, ok, ScriptedRunner};
    use crate::runner::StdioMode;
    use std::path::PathBuf;

    fn instance(version: u32, port: u16) -> InstanceConfig {
        InstanceConfig {
            data_dir: PathBuf::from(format!("/data/{}", version)),
            bin_dir: PathBuf::from(format!("/usr/lib/postgresql/{}/bin", version)),
            port,
            version: MajorVersion {
                major: version,
                minor: 0,
            },
        }
    }

    fn config(mode: UpgradeMode) -> UpgradeConfig {
        UpgradeConfig {
            mode,
            old: instance(14, 5432),
            new: instance(16, 5433),
            user: "postgres".into(),
            extensions: ExtensionSet::default(),
            jobs: 4,
            work_dir: PathBuf::from("/work"),
        }
    }

    #[test]
    fn test_pg_ctl_uses_instance_binaries() {
        let cmd = pg_ctl_status(&instance(14, 5432));
        assert_eq!(
            cmd.program,
            PathBuf::from("/usr/lib/postgresql/14/bin/pg_ctl")
        );
        assert_eq!(cmd.args, vec!["status", "-D", "/data/14"]);

        let cmd = pg_ctl_stop(&instance(16, 5433));
        assert_eq!(cmd.args, vec!["stop", "-D", "/data/16", "-m", "fast", "-w"]);
    }

    #[test]
    fn test_pg_ctl_start_logs_to_file() {
        let cmd = pg_ctl_start(&instance(16, 5433), Path::new("/work/server.log"));
        assert_eq!(
            cmd.args,
            vec!["start", "-D", "/data/16", "-l", "/work/server.log", "-w"]
        );
        assert_eq!(cmd.stdio, StdioMode::Capture);
    }

    #[test]
    fn test_psql_query_args() {
        let cmd = psql_query(&instance(14, 5432), "postgres", "app", "SELECT 1");
        assert_eq!(cmd.program_name(), "psql");
        assert_eq!(
            cmd.args,
            vec![
                "-X", "-q", "-v", "ON_ERROR_STOP=1", "-p", "5432", "-U", "postgres", "-d", "app",
                "-A", "-t", "-c", "SELECT 1"
            ]
        );
    }

    #[test]
    fn test_pg_upgrade_args() {
        let cmd = pg_upgrade(&config(UpgradeMode::Clone));
        assert_eq!(
            cmd.program,
            PathBuf::from("/usr/lib/postgresql/16/bin/pg_upgrade")
        );
        assert_eq!(
            cmd.args,
            vec![
                "--old-datadir",
                "/data/14",
                "--new-datadir",
                "/data/16",
                "--old-bindir",
                "/usr/lib/postgresql/14/bin",
                "--new-bindir",
                "/usr/lib/postgresql/16/bin",
                "--old-port",
                "5432",
                "--new-port",
                "5433",
                "--username",
                "postgres",
                "--old-options",
                "-c config_file=/data/14/postgresql.conf",
                "--new-options",
                "-c config_file=/data/16/postgresql.conf",
                "--clone",
            ]
        );
        assert_eq!(cmd.current_dir, Some(PathBuf::from("/work")));
        assert_eq!(cmd.stdio, StdioMode::Inherit);

        assert!(pg_upgrade(&config(UpgradeMode::Check)).has_arg("--check"));
        assert!(pg_upgrade(&config(UpgradeMode::Link)).has_arg("--link"));
    }

    #[test]
    fn test_vacuumdb_uses_jobs_and_new_port() {
        let cmd = vacuumdb_analyze(&config(UpgradeMode::Copy));
        assert_eq!(cmd.program_name(), "vacuumdb");
        assert_eq!(
            cmd.args,
            vec!["--all", "--analyze-in-stages", "--jobs", "4", "-p", "5433", "-U", "postgres"]
        );
    }

    #[tokio::test]
    async fn test_query_lines_trims_and_skips_blank() {
        let runner = ScriptedRunner::new(|_| Ok(ok(" app \n\npostgres\n")));
        let output = Output::new(true, false);
        let shell = Shell::new(&runner, &output);
        let lines = query_lines(&shell, &instance(14, 5432), "postgres", "postgres", "SELECT")
            .await
            .unwrap();
        assert_eq!(lines, vec!["app", "postgres"]);
    }

    #[tokio::test]
    async fn test_query_lines_reports_psql_error() {
        let runner = ScriptedRunner::new(|_| Ok(failed(2, "connection refused")));
        let output = Output::new(true, false);
        let shell = Shell::new(&runner, &output);
        let err = query_lines(&shell, &instance(14, 5432), "postgres", "postgres", "SELECT")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "psql exited with code 2: connection refused"
        );
    }
}
