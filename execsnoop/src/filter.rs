use anyhow::{Context, Result};
use regex::Regex;

use crate::{assembler::Exec, settings::OutputSettings};

/// Decides which completed execs reach the output.
#[derive(Debug, Default)]
pub struct Filter {
    only_ancestor: bool,
    include_failed: bool,
    name: Option<Regex>,
    line: Option<Regex>,
}

impl Filter {
    pub fn from_settings(settings: &OutputSettings) -> Result<Self> {
        let name = settings
            .name_filter
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("Invalid name filter {:?}", pattern))
            })
            .transpose()?;
        let line = settings
            .line_filter
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("Invalid line filter {:?}", pattern))
            })
            .transpose()?;

        Ok(Self {
            only_ancestor: settings.only_ancestor.unwrap_or(false),
            include_failed: settings.include_failed.unwrap_or(false),
            name,
            line,
        })
    }

    pub fn matches(&self, exec: &Exec) -> bool {
        if self.only_ancestor && !exec.ancestor {
            return false;
        }
        if !self.include_failed && !exec.succeeded() {
            return false;
        }
        if let Some(name) = &self.name {
            if !name.is_match(&exec.comm) {
                return false;
            }
        }
        if let Some(line) = &self.line {
            if !line.is_match(&exec.command.args.join(" ")) {
                return false;
            }
        }
        true
    }
}
