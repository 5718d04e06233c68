//! Secret reference resolver.
//!
//! The API token in `config.toml` may reference a secret stored outside the
//! file:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and keeps the
//!   first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is used as-is

use crate::error::{CliError, CliResult};

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> CliResult<String> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var)
            .map_err(|_| CliError::Secret(format!("environment variable `{}` is not set", var)))
    } else {
        Ok(value.to_string())
    }
}

fn resolve_pass(path: &str) -> CliResult<String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| CliError::Secret(format!("failed to run `pass show {}`: {}", path, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CliError::Secret(format!(
            "`pass show {}` failed ({}): {}",
            path,
            output.status,
            stderr.trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| CliError::Secret(format!("`pass show {}` produced no output", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token_passthrough() {
        assert_eq!(resolve("tok-123").unwrap(), "tok-123");
        assert_eq!(resolve("").unwrap(), "");
    }

    #[test]
    fn env_reference_resolves() {
        unsafe {
            std::env::set_var("_ROOMBOOK_TEST_TOKEN", "secret-token");
        }
        assert_eq!(resolve("env::_ROOMBOOK_TEST_TOKEN").unwrap(), "secret-token");
        unsafe {
            std::env::remove_var("_ROOMBOOK_TEST_TOKEN");
        }
    }

    #[test]
    fn missing_env_var_errors() {
        let err = resolve("env::_ROOMBOOK_UNSET_VAR_98765").unwrap_err();
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn unknown_pass_entry_errors() {
        assert!(resolve("pass::roombook/does/not/exist/98765").is_err());
    }
}
