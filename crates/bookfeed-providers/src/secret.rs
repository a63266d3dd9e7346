//! Secret references in configuration values.
//!
//! Credential fields in `booking.toml` may point at a secret instead of
//! holding it:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and takes the first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is used verbatim

use std::process::Command;

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Resolves a value that may carry a secret reference prefix.
pub fn resolve(value: &str) -> ProviderResult<String> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        resolve_env(var)
    } else {
        Ok(value.to_string())
    }
}

/// Resolves an optional value; `None` stays `None`.
pub fn resolve_optional(value: Option<&str>) -> ProviderResult<Option<String>> {
    value.map(resolve).transpose()
}

fn resolve_pass(path: &str) -> ProviderResult<String> {
    debug!(path = %path, "Resolving secret from pass");
    let output = Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| {
            ProviderError::configuration(format!("failed to run `pass show {}`", path))
                .with_source(e)
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::configuration(format!(
            "`pass show {}` failed (exit {}): {}",
            path,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ProviderError::configuration(format!("`pass show {}` produced no output", path))
        })
}

fn resolve_env(var: &str) -> ProviderResult<String> {
    std::env::var(var).map_err(|_| {
        ProviderError::configuration(format!("environment variable `{}` is not set", var))
    })
}
