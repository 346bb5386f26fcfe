//! Filesystem checks run before any external command.
//!
//! Missing directories or binaries are configuration errors. A `PG_VERSION`
//! file that disagrees with the declared version only produces a warning,
//! since pg_upgrade's own check is authoritative.

use anyhow::Result;
use std::fs;

use crate::config::{usage_error, InstanceConfig, MajorVersion, UpgradeConfig};

/// Validate the resolved config against the filesystem; returns warnings.
pub fn check(config: &UpgradeConfig) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    for (label, instance) in [("old", &config.old), ("new", &config.new)] {
        if !instance.data_dir.is_dir() {
            return Err(usage_error(format!(
                "{} data directory not found: {}",
                capitalize(label),
                instance.data_dir.display()
            )));
        }
        if !instance.bin_dir.is_dir() {
            return Err(usage_error(format!(
                "{} binary directory not found: {}",
                capitalize(label),
                instance.bin_dir.display()
            )));
        }
        if let Some(warning) = version_mismatch(label, instance) {
            warnings.push(warning);
        }
    }

    let pg_upgrade = config.new.tool("pg_upgrade");
    if !pg_upgrade.is_file() {
        return Err(usage_error(format!(
            "pg_upgrade not found at {}\nHint: --new-bin-path must point at the new version's bin directory.",
            pg_upgrade.display()
        )));
    }

    if !config.work_dir.is_dir() {
        return Err(usage_error(format!(
            "Work directory not found: {}",
            config.work_dir.display()
        )));
    }

    Ok(warnings)
}

/// Compare `<data_dir>/PG_VERSION` with the declared version
fn version_mismatch(label: &str, instance: &InstanceConfig) -> Option<String> {
    let path = instance.data_dir.join("PG_VERSION");
    let contents = fs::read_to_string(&path).ok()?;
    let on_disk: MajorVersion = contents.trim().parse().ok()?;
    if on_disk == instance.version {
        return None;
    }
    Some(format!(
        "{} data directory {} contains a version {} cluster, but version {} was given",
        capitalize(label),
        instance.data_dir.display(),
        on_disk,
        instance.version
    ))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
