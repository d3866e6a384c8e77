//! Running an external command once per table row.

use std::process::Command;

use tracing::info;

use crate::{BatchError, Result, Row};

/// Turn a row into command-line arguments.
///
/// Each non-empty cell becomes a flag followed by its value. Column names are
/// prefixed with `--` unless they already start with `-`.
pub fn build_command_args(row: &Row) -> Vec<String> {
    let mut args = Vec::with_capacity(row.len() * 2);
    for (name, value) in row {
        let Some(value) = value else { continue };
        if name.starts_with('-') {
            args.push(name.clone());
        } else {
            args.push(format!("--{name}"));
        }
        args.push(value.clone());
    }
    args
}

/// A base command that rows are appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    program: String,
    base_args: Vec<String>,
}

impl CliInvocation {
    /// Create an invocation from a program and its fixed leading arguments.
    pub fn new<I, S>(base_command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = base_command.into_iter().map(Into::into);
        let program = parts.next().ok_or(BatchError::EmptyCommand)?;
        Ok(Self {
            program,
            base_args: parts.collect(),
        })
    }

    /// The full argument vector for `row`, program first.
    pub fn command_line(&self, row: &Row) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.base_args.iter().cloned())
            .chain(build_command_args(row))
            .collect()
    }

    /// Run the command for `row` and wait for it.
    ///
    /// A non-zero exit status is an error.
    pub fn run(&self, row: &Row) -> Result<String> {
        let line = self.command_line(row);
        let rendered = line.join(" ");
        info!("Running command: {}", rendered);

        let status = Command::new(&self.program)
            .args(&line[1..])
            .status()
            .map_err(|source| BatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(rendered)
        } else {
            Err(BatchError::CommandFailed {
                command: rendered,
                status: status.to_string(),
            })
        }
    }
}
