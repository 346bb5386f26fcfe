//! Common test infrastructure for pgshift integration tests.
//!
//! Provides:
//! - TestCluster: temp directory with old/new data and bin directories whose
//!   `pg_ctl`, `psql`, `pg_upgrade` and `vacuumdb` are shell stubs that append
//!   every invocation to a call log
//! - Helpers to run the compiled binary (CARGO_BIN_EXE_pgshift) against it

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

pub const OLD_PORT: &str = "5432";
pub const NEW_PORT: &str = "5433";

/// How the stubbed instances behave
#[derive(Debug, Clone)]
pub struct Scenario {
    pub old_running: bool,
    pub old_standby: bool,
    pub new_running: bool,
    pub pg_upgrade_exit: i32,
    pub start_exit: i32,
    pub vacuumdb_exit: i32,
    /// Databases reported by `pg_database`
    pub databases: Vec<&'static str>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            old_running: false,
            old_standby: false,
            new_running: false,
            pg_upgrade_exit: 0,
            start_exit: 0,
            vacuumdb_exit: 0,
            databases: vec!["app", "postgres"],
        }
    }
}

pub struct TestCluster {
    dir: TempDir,
}

impl TestCluster {
    pub fn new(scenario: Scenario) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cluster = Self { dir };

        for sub in ["old/data", "old/bin", "new/data", "new/bin", "work"] {
            fs::create_dir_all(cluster.root().join(sub)).unwrap();
        }
        fs::write(cluster.old_data().join("PG_VERSION"), "14\n").unwrap();
        fs::write(cluster.new_data().join("PG_VERSION"), "16\n").unwrap();
        fs::write(cluster.new_conf(), "# initdb defaults\nmax_connections = 100").unwrap();

        cluster.write_stubs("old", &scenario, scenario.old_running);
        cluster.write_stubs("new", &scenario, scenario.new_running);
        cluster
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn old_data(&self) -> PathBuf {
        self.root().join("old/data")
    }

    pub fn new_data(&self) -> PathBuf {
        self.root().join("new/data")
    }

    pub fn new_conf(&self) -> PathBuf {
        self.new_data().join("postgresql.conf")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root().join("work")
    }

    pub fn summary_log(&self) -> PathBuf {
        self.work_dir().join("pg_upgrade_summary.log")
    }

    fn call_log(&self) -> PathBuf {
        self.root().join("calls.log")
    }

    /// Every stub invocation as "<side>/<tool> <args>", in order
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.call_log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Index of the first call containing `needle`
    pub fn call_index(&self, needle: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(needle))
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    /// The full set of required flags for `mode`
    pub fn required_args(&self, mode: &str) -> Vec<String> {
        let root = self.root();
        vec![
            mode.to_string(),
            "--old-path".into(),
            self.old_data().display().to_string(),
            "--new-path".into(),
            self.new_data().display().to_string(),
            "--old-bin-path".into(),
            root.join("old/bin").display().to_string(),
            "--new-bin-path".into(),
            root.join("new/bin").display().to_string(),
            "--old-port".into(),
            OLD_PORT.into(),
            "--new-port".into(),
            NEW_PORT.into(),
            "--pguser".into(),
            "postgres".into(),
            "--pg-old-version".into(),
            "14".into(),
            "--pg-new-version".into(),
            "16".into(),
        ]
    }

    /// Run pgshift in the work directory, feeding `stdin` to the prompt
    pub fn run(&self, args: &[String], stdin: &str) -> Output {
        let mut child = Command::new(pgshift_binary())
            .args(args)
            .current_dir(self.work_dir())
            .env_remove("PGUSER")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to execute pgshift");

        if let Some(mut pipe) = child.stdin.take() {
            // The process may exit before reading (usage errors)
            let _ = pipe.write_all(stdin.as_bytes());
        }
        child.wait_with_output().expect("Failed to wait for pgshift")
    }

    fn write_stubs(&self, side: &str, scenario: &Scenario, running: bool) {
        let bin = self.root().join(side).join("bin");
        let log = self.call_log().display().to_string();
        let record = |tool: &str| format!("echo \"{}/{} $*\" >> \"{}\"\n", side, tool, log);

        let status = if running {
            "echo \"pg_ctl: server is running (PID: 4242)\"\n    exit 0\n"
        } else {
            "echo \"pg_ctl: no server running\"\n    exit 3\n"
        };
        let pg_ctl = format!(
            "#!/bin/sh\n{}case \"$1\" in\n  status)\n    {}    ;;\n  start)\n    exit {}\n    ;;\nesac\nexit 0\n",
            record("pg_ctl"),
            status,
            scenario.start_exit
        );
        write_executable(&bin.join("pg_ctl"), &pg_ctl);

        let in_recovery = if scenario.old_standby { "t" } else { "f" };
        let psql = format!(
            "#!/bin/sh\n{}case \"$*\" in\n  *pg_is_in_recovery*) echo {} ;;\n  *pg_database*) printf '{}\\n' ;;\n  *pg_extension*) echo 1 ;;\nesac\nexit 0\n",
            record("psql"),
            in_recovery,
            scenario.databases.join("\\n")
        );
        write_executable(&bin.join("psql"), &psql);

        let pg_upgrade = format!(
            "#!/bin/sh\n{}exit {}\n",
            record("pg_upgrade"),
            scenario.pg_upgrade_exit
        );
        write_executable(&bin.join("pg_upgrade"), &pg_upgrade);

        let vacuumdb = format!(
            "#!/bin/sh\n{}exit {}\n",
            record("vacuumdb"),
            scenario.vacuumdb_exit
        );
        write_executable(&bin.join("vacuumdb"), &vacuumdb);
    }
}

fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Get the path to the compiled pgshift binary
pub fn pgshift_binary() -> String {
    env!("CARGO_BIN_EXE_pgshift").to_string()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Assert exit code with both streams in the failure message
pub fn assert_exit(output: &Output, expected: i32) {
    assert_eq!(
        output.status.code(),
        Some(expected),
        "unexpected exit code\nstdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
}
