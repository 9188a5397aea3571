use std::env;

pub const PROMPT_VAR: &str = "PIPESH_PROMPT";
pub const NO_BANNER_VAR: &str = "PIPESH_NO_BANNER";
pub const NO_HISTORY_VAR: &str = "PIPESH_NO_HISTORY";
pub const LOG_VAR: &str = "PIPESH_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    pub banner: bool,
    pub history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prompt: "> ".into(),
            banner: true,
            history: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Config {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `lookup`, which maps a variable name to its value.
    ///
    /// The switch variables count as set for any value except `0` and the
    /// empty string.
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let switched_off = |key: &str| matches!(lookup(key).as_deref(), Some(v) if !v.is_empty() && v != "0");

        Config {
            prompt: lookup(PROMPT_VAR).unwrap_or(defaults.prompt),
            banner: !switched_off(NO_BANNER_VAR),
            history: !switched_off(NO_HISTORY_VAR),
        }
    }
}
