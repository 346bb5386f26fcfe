//! Output layer for pgshift.
//!
//! Centralizes terminal output so every step reports the same way.
//! - stdout: progress (step headings, results)
//! - stderr: warnings and errors
//!
//! `--quiet` keeps only warnings and errors; `--verbose` additionally echoes
//! every external command line before it runs.

use colored::Colorize;
use std::io::{self, Write};

/// Output helper that centralizes all CLI output
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub quiet: bool,
    pub verbose: bool,
}

impl Output {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }

    /// Step heading, e.g. "Running pg_upgrade (clone)..."
    pub fn step(&self, message: &str) {
        if self.quiet {
            return;
        }
        println!("{}", message.bold().cyan());
    }

    /// Plain progress line
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        println!("{}", message);
    }

    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        println!("{}", message.green());
    }

    /// Echo an external command line (only with --verbose)
    pub fn command(&self, command_line: &str) {
        if self.quiet || !self.verbose {
            return;
        }
        println!("  {} {}", "$".dimmed(), command_line.dimmed());
    }

    /// Warnings are shown even in quiet mode; they usually explain a skipped step.
    pub fn warn(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", message.red());
    }

    /// Flush stdout (before prompting or handing the terminal to a child process)
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
