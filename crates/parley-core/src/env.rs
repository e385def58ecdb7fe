//! Environment variable handling.

use std::env;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
pub fn get_var_or(name: &str, default: &str) -> String {
    get_var(name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable as a boolean.
pub fn get_bool(name: &str) -> bool {
    get_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Get an environment variable as a u16 (e.g., for ports).
pub fn get_u16(name: &str) -> Option<u16> {
    get_var(name).and_then(|v| v.parse().ok())
}

/// Common environment variable names.
pub mod vars {
    /// Parley home directory override.
    pub const PARLEY_HOME: &str = "PARLEY_HOME";

    /// Parley config file override.
    pub const PARLEY_CONFIG: &str = "PARLEY_CONFIG";

    /// Gateway port override.
    pub const PARLEY_PORT: &str = "PARLEY_PORT";

    /// Database URL override.
    pub const PARLEY_DATABASE_URL: &str = "PARLEY_DATABASE_URL";

    /// Token signing secret.
    pub const PARLEY_TOKEN_SECRET: &str = "PARLEY_TOKEN_SECRET";

    /// Log filter directive, in `EnvFilter` syntax.
    pub const PARLEY_LOG: &str = "PARLEY_LOG";
}
