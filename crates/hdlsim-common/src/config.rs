//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Environment variable that, when set to any non-empty value, makes the
/// engine dump every compiled module to a kept temporary file.
pub const DUMP_ENV_VAR: &str = "HDLSIM_WASM_DUMP";

/// Tunables for the simulation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dump each compiled module's text to a temporary file.
    pub dump_modules: bool,
}

impl EngineConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        EngineConfig {
            dump_modules: std::env::var(DUMP_ENV_VAR)
                .map(|v| !v.is_empty())
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_quiet() {
        let config = EngineConfig::default();
        assert!(!config.dump_modules);
    }
}
