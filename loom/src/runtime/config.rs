//! Runtime configuration (§10): `.env`/XDG config loaded via `env_config`,
//! then the knobs this crate actually consumes — `max_tool_iterations`,
//! `output_channel_capacity`, session-backend selection — read out of the
//! resulting process environment.

use std::path::Path;
use std::str::FromStr;

use super::invocation::RunOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("loading .env/XDG config: {0}")]
    Load(#[from] env_config::LoadError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionBackend {
    InMemory,
    Sqlite,
}

impl FromStr for SessionBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" | "in_memory" | "in-memory" => Ok(Self::InMemory),
            _ => Err(()),
        }
    }
}

/// Runtime knobs sourced from the environment, layered on `RunOptions::default()`.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub max_tool_iterations: usize,
    pub output_channel_capacity: usize,
    pub session_backend: SessionBackend,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let defaults = RunOptions::default();
        Self {
            max_tool_iterations: defaults.max_tool_iterations,
            output_channel_capacity: defaults.output_channel_capacity,
            session_backend: SessionBackend::InMemory,
        }
    }
}

impl RuntimeConfig {
    /// Applies `.env`/XDG `~/.config/<app_name>/config.toml` to the process
    /// environment, then reads the runtime knobs back out of it.
    pub fn load(app_name: &str, override_dir: Option<&Path>) -> Result<Self, ConfigError> {
        env_config::load_and_apply(app_name, override_dir)?;
        Ok(Self::from_env())
    }

    /// Reads the knobs straight from the current process environment, without
    /// touching `.env`/XDG.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("LOOM_MAX_TOOL_ITERATIONS") {
            if let Ok(n) = v.parse() {
                config.max_tool_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("LOOM_OUTPUT_CHANNEL_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.output_channel_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("LOOM_SESSION_BACKEND") {
            if let Ok(backend) = v.parse() {
                config.session_backend = backend;
            }
        }
        config
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_tool_iterations: self.max_tool_iterations,
            output_channel_capacity: self.output_channel_capacity,
            ..RunOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_run_options_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LOOM_MAX_TOOL_ITERATIONS");
        std::env::remove_var("LOOM_OUTPUT_CHANNEL_CAPACITY");
        std::env::remove_var("LOOM_SESSION_BACKEND");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.max_tool_iterations, RunOptions::default().max_tool_iterations);
        assert_eq!(config.session_backend, SessionBackend::InMemory);
    }

    #[test]
    fn env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LOOM_MAX_TOOL_ITERATIONS", "25");
        std::env::set_var("LOOM_SESSION_BACKEND", "sqlite");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.max_tool_iterations, 25);
        assert_eq!(config.session_backend, SessionBackend::Sqlite);
        std::env::remove_var("LOOM_MAX_TOOL_ITERATIONS");
        std::env::remove_var("LOOM_SESSION_BACKEND");
    }

    #[test]
    fn invalid_numeric_override_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LOOM_MAX_TOOL_ITERATIONS", "not-a-number");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.max_tool_iterations, RunOptions::default().max_tool_iterations);
        std::env::remove_var("LOOM_MAX_TOOL_ITERATIONS");
    }
}
