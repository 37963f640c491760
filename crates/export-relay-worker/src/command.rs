//! Export command parsing and validation.

use std::path::PathBuf;

use thiserror::Error;

use crate::shell::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Command cannot be parsed: {0}")]
    InvalidCommand(String),
    #[error("Command is empty after parsing")]
    EmptyCommand,
    #[error("Command not found: {0}")]
    NotFound(String),
}

/// A parsed export command line.
///
/// The full line is handed to the shell unchanged; the split form is
/// only used to check that the program exists before spawning.
#[derive(Debug, Clone)]
pub struct ExportCommand {
    line: String,
    program: String,
    args: Vec<String>,
}

impl ExportCommand {
    /// Parse a command line.
    ///
    /// # Errors
    /// Returns error if the line cannot be split or is empty.
    pub fn parse(line: &str) -> Result<Self, CommandBuildError> {
        let mut parts = split_command_line(line)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(Self {
            line: line.trim().to_string(),
            program,
            args: parts,
        })
    }

    /// The full line as given.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The program (first word).
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if the executable cannot be found.
    pub async fn resolve(&self) -> Result<PathBuf, CommandBuildError> {
        resolve_executable_path(&self.program)
            .await
            .ok_or_else(|| CommandBuildError::NotFound(self.line.clone()))
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    shlex::split(input).ok_or_else(|| CommandBuildError::InvalidCommand(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_quoted_args() {
        let cmd = ExportCommand::parse("export_data --mode 'server side'").unwrap();
        assert_eq!(cmd.program(), "export_data");
        assert_eq!(cmd.args(), ["--mode", "server side"]);
        assert_eq!(cmd.line(), "export_data --mode 'server side'");
    }

    #[test]
    fn test_parse_rejects_empty_and_unbalanced() {
        assert!(matches!(
            ExportCommand::parse("   "),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            ExportCommand::parse("export_data 'oops"),
            Err(CommandBuildError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_reports_full_line() {
        let cmd = ExportCommand::parse("/home/user/.local/bin/export_data --mode server").unwrap();
        let err = cmd.resolve().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command not found: /home/user/.local/bin/export_data --mode server"
        );
    }
}
