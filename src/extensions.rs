//! Extension handling around the upgrade.
//!
//! Extensions that cannot survive pg_upgrade are dropped from every database
//! of the old cluster before the transform and recreated in every database of
//! the new cluster afterwards. Both phases are best effort per
//! (database, extension) pair: one failure is recorded and the loop moves on.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::InstanceConfig;
use crate::output::Output;
use crate::runner::{CommandRunner, Shell};
use crate::sql;
use crate::tools::{self, MAINTENANCE_DB};

/// Ordered list of extension names from `--extensions a,b,c`.
///
/// Duplicates are kept as given; the drop phase's existence check makes a
/// repeated name harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    names: Vec<String>,
}

impl ExtensionSet {
    pub fn parse(list: &str) -> Self {
        Self::from_names(list.split(','))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

impl std::fmt::Display for ExtensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.names.join(", "))
    }
}

/// A single (database, extension) pair that could not be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFailure {
    pub database: String,
    pub extension: String,
    pub message: String,
}

/// What one phase did across all databases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionReport {
    pub databases: Vec<String>,
    /// Pairs visited (databases × extensions)
    pub attempted: usize,
    /// Pairs where an extension was dropped or created
    pub changed: Vec<(String, String)>,
    pub failures: Vec<ExtensionFailure>,
}

impl ExtensionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Databases that can hold extensions (all except template0)
pub async fn list_databases<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
) -> Result<Vec<String>> {
    tools::query_lines(shell, instance, user, MAINTENANCE_DB, sql::LIST_DATABASES_SQL)
        .await
        .with_context(|| format!("Failed to list databases on port {}", instance.port))
}

/// Drop each configured extension from every database of the old cluster.
///
/// Only extensions that exist are dropped. Returns `Err` only when the
/// database list itself cannot be read.
pub async fn drop_extensions<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
    extensions: &ExtensionSet,
) -> Result<ExtensionReport> {
    if extensions.is_empty() {
        return Ok(ExtensionReport::default());
    }

    let output = shell.output;
    let databases = list_databases(shell, instance, user).await?;
    let mut report = ExtensionReport {
        databases: databases.clone(),
        ..Default::default()
    };

    for database in &databases {
        for extension in extensions.names() {
            report.attempted += 1;

            let exists_sql = sql::extension_exists_sql(extension);
            let exists = match tools::query_lines(shell, instance, user, database, &exists_sql)
                .await
            {
                Ok(rows) => rows.iter().any(|r| r == "1"),
                Err(e) => {
                    record_failure(&mut report, output, database, extension, e);
                    continue;
                }
            };

            if !exists {
                output.info(&format!(
                    "  {} {} not installed in {}",
                    "-".dimmed(),
                    extension,
                    database
                ));
                continue;
            }

            let drop_sql = sql::drop_extension_sql(extension);
            match tools::execute(shell, instance, user, database, &drop_sql).await {
                Ok(()) => {
                    output.info(&format!(
                        "  {} dropped {} from {}",
                        "✓".green(),
                        extension,
                        database
                    ));
                    report.changed.push((database.clone(), extension.clone()));
                }
                Err(e) => record_failure(&mut report, output, database, extension, e),
            }
        }
    }

    Ok(report)
}

/// Create each configured extension in every database of the new cluster.
///
/// Uses `IF NOT EXISTS`, so extensions already present are left alone.
pub async fn create_extensions<R: CommandRunner>(
    shell: &Shell<'_, R>,
    instance: &InstanceConfig,
    user: &str,
    extensions: &ExtensionSet,
) -> Result<ExtensionReport> {
    if extensions.is_empty() {
        return Ok(ExtensionReport::default());
    }

    let output = shell.output;
    let databases = list_databases(shell, instance, user).await?;
    let mut report = ExtensionReport {
        databases: databases.clone(),
        ..Default::default()
    };

    for database in &databases {
        for extension in extensions.names() {
            report.attempted += 1;
            let create_sql = sql::create_extension_sql(extension);
            match tools::execute(shell, instance, user, database, &create_sql).await {
                Ok(()) => {
                    output.info(&format!(
                        "  {} {} in {}",
                        "✓".green(),
                        extension,
                        database
                    ));
                    report.changed.push((database.clone(), extension.clone()));
                }
                Err(e) => record_failure(&mut report, output, database, extension, e),
            }
        }
    }

    Ok(report)
}

fn record_failure(
    report: &mut ExtensionReport,
    output: &Output,
    database: &str,
    extension: &str,
    error: anyhow::Error,
) {
    output.warn(&format!("  ✗ {} in {}: {:#}", extension, database, error));
    report.failures.push(ExtensionFailure {
        database: database.to_string(),
        extension: extension.to_string(),
        message: format!("{:#}", error),
    });
}
