//! Validation of manifest-supplied commands and node names.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

const MAX_COMMAND_LEN: usize = 10_000;

// npm-style names: optional `@scope/` prefix, then lowercase-ish segments.
static NODE_NAME: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(@[A-Za-z0-9][A-Za-z0-9._-]*/)?[A-Za-z0-9][A-Za-z0-9._-]*$").ok()
});

/// Validates compiler commands before they are handed to a shell.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    allow_shell: bool,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self { allow_shell: true }
    }
}

impl CommandValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator that refuses shell operators.
    pub fn strict() -> Self {
        Self { allow_shell: false }
    }

    /// Validates a command string for `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] for empty or oversized commands,
    /// NUL bytes, embedded newlines, and (in strict mode) shell operators.
    pub fn validate(&self, node: &str, command: &str) -> Result<()> {
        let reject = |message: String| {
            Err(Error::InvalidCommand {
                node: node.to_string(),
                message,
            })
        };

        if command.trim().is_empty() {
            return reject("command cannot be empty".to_string());
        }
        if command.len() > MAX_COMMAND_LEN {
            return reject(format!("command exceeds {} bytes", MAX_COMMAND_LEN));
        }
        if command.contains('\0') {
            return reject("command contains a NUL byte".to_string());
        }
        if command.contains('\n') || command.contains('\r') {
            return reject("command contains an embedded newline".to_string());
        }
        if !self.allow_shell
            && (command.contains(';')
                || command.contains("&&")
                || command.contains("||")
                || command.contains('|')
                || command.contains('`')
                || command.contains('$'))
        {
            return reject(format!("shell operators are not allowed: {}", command));
        }

        Ok(())
    }

    /// Checks that `name` is a usable node name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNodeName`] if the name does not match the
    /// package-name pattern.
    pub fn validate_node_name(name: &str) -> Result<()> {
        match NODE_NAME.as_ref() {
            Some(pattern) if pattern.is_match(name) => Ok(()),
            _ => Err(Error::InvalidNodeName(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_commands() {
        let validator = CommandValidator::new();
        assert!(validator.validate("core", "tsc --noEmit").is_ok());
        assert!(validator.validate("core", "tsc -b && echo done").is_ok());
    }

    #[test]
    fn rejects_empty_and_multiline() {
        let validator = CommandValidator::new();
        assert!(validator.validate("core", "   ").is_err());
        assert!(validator.validate("core", "tsc\nrm -rf /").is_err());
        assert!(validator.validate("core", "tsc\0").is_err());
        assert!(validator.validate("core", &"a".repeat(10_001)).is_err());
    }

    #[test]
    fn strict_mode_refuses_shell_operators() {
        let validator = CommandValidator::strict();
        assert!(validator.validate("core", "tsc --noEmit").is_ok());
        assert!(validator.validate("core", "tsc; rm -rf /").is_err());
        assert!(validator.validate("core", "tsc | tee log").is_err());
        assert!(validator.validate("core", "echo $HOME").is_err());
    }

    #[test]
    fn node_names() {
        assert!(CommandValidator::validate_node_name("core").is_ok());
        assert!(CommandValidator::validate_node_name("@acme/api-gateway").is_ok());
        assert!(CommandValidator::validate_node_name("lib.utils_2").is_ok());
        assert!(CommandValidator::validate_node_name("").is_err());
        assert!(CommandValidator::validate_node_name("has space").is_err());
        assert!(CommandValidator::validate_node_name("@scope/").is_err());
        assert!(CommandValidator::validate_node_name("../escape").is_err());
    }
}
