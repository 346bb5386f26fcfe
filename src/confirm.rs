//! Confirmation gate for commands that modify the clusters.

use anyhow::Result;
use std::io::{self, BufRead, IsTerminal, Write};

/// Asks the operator before anything is changed.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Interactive prompt: dialoguer on a terminal, a plain line from stdin otherwise
/// (so `echo y | pgshift clone ...` works in scripts).
#[derive(Debug, Default, Clone, Copy)]
pub struct Prompt;

impl Confirmation for Prompt {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        if io::stdin().is_terminal() {
            let answer = dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()?;
            return Ok(answer);
        }

        print!("{} [y/N] ", prompt);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(is_affirmative(&input))
    }
}

/// `--yes`: never prompts
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
