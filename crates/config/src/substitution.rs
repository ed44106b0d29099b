use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use std::sync::OnceLock;
use tracing::{debug, warn};

const PLACEHOLDER: &str = r"\$\{(\w+)\}|\$(\w+)";

fn placeholder_regex() -> Result<&'static Regex> {
    static RE: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = RE.get() {
        return Ok(re);
    }
    let re = Regex::new(PLACEHOLDER).context("invalid placeholder pattern")?;
    Ok(RE.get_or_init(|| re))
}

/// Replace `${VAR}` / `$VAR` with environment values
///
/// Unset variables keep their placeholder; the validator reports them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = placeholder_regex()?;
    let mut missing = Vec::new();

    let result = re.replace_all(content, |caps: &regex::Captures<'_>| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match env::var(name) {
            Ok(value) => {
                debug!(var = name, "Substituted environment variable");
                value
            }
            Err(_) => {
                missing.push(name.to_string());
                whole.to_string()
            }
        }
    });

    if !missing.is_empty() {
        warn!(?missing, "Environment variables not set");
    }

    Ok(result.into_owned())
}

/// Get environment variable with a default value
pub fn get_env_or_default(var_name: &str, default: &str) -> String {
    env::var(var_name).unwrap_or_else(|_| {
        debug!(var = var_name, default, "Environment variable not set, using default");
        default.to_string()
    })
}

/// Check if a string still contains `${VAR}` placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    placeholder_regex()
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}
