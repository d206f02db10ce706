//! Resolution of the opaque profiling configuration handed to the engine.
//!
//! Priority: `PROFILER_SAMPLECONFIG` env value, then the `profiler` member of
//! a JSON config file, then dynamic mode (no static config).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::CtrlInitMode;

pub const PROFILER_ENV: &str = "PROFILER_SAMPLECONFIG";
pub const PROFILER_CONFIG_KEY: &str = "profiler";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    pub mode: CtrlInitMode,
    /// Passed to the engine verbatim; empty in dynamic mode.
    pub payload: String,
}

impl ProfilingConfig {
    pub fn dynamic() -> Self {
        Self {
            mode: CtrlInitMode::Dynamic,
            payload: String::new(),
        }
    }

    /// Resolve from the process environment and an optional config file.
    pub fn resolve(config_path: Option<&Path>) -> Self {
        let env = std::env::var(PROFILER_ENV).ok();
        Self::from_sources(env.as_deref(), config_path)
    }

    pub fn from_sources(env_value: Option<&str>, config_path: Option<&Path>) -> Self {
        if let Some(value) = env_value.filter(|v| !v.is_empty()) {
            log::info!("using profiling config from {PROFILER_ENV}");
            return Self {
                mode: CtrlInitMode::EnvConfig,
                payload: value.to_string(),
            };
        }

        let Some(path) = config_path.filter(|p| !p.as_os_str().is_empty()) else {
            log::info!("no profiling config path, profiling stays dynamic");
            return Self::dynamic();
        };

        match read_profiler_section(path) {
            Some(payload) => {
                log::info!("using profiling config from {:?}", path);
                Self {
                    mode: CtrlInitMode::JsonConfig,
                    payload,
                }
            }
            None => Self::dynamic(),
        }
    }
}

fn read_profiler_section(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::info!("cannot read profiling config {:?}: {e}", path);
            return None;
        }
    };
    let json: serde_json::Value = match serde_json::from_str(&content) {
        Ok(json) => json,
        Err(e) => {
            log::info!("cannot parse profiling config {:?}: {e}", path);
            return None;
        }
    };
    match json.get(PROFILER_CONFIG_KEY) {
        Some(section) if !section.is_null() => Some(section.to_string()),
        _ => {
            log::info!("profiling config {:?} has no {PROFILER_CONFIG_KEY} section", path);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_config(tag: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("acl-prof-{tag}-{}.json", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_env_wins_over_file() {
        let path = write_config("env-wins", r#"{"profiler": {"switch": "on"}}"#);
        let config =
            ProfilingConfig::from_sources(Some("{\"switch\":\"off\"}"), Some(path.as_path()));
        assert_eq!(config.mode, CtrlInitMode::EnvConfig);
        assert_eq!(config.payload, "{\"switch\":\"off\"}");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_empty_env_falls_back_to_file() {
        let path = write_config("file", r#"{"profiler": {"switch": "on", "output": "out"}}"#);
        let config = ProfilingConfig::from_sources(Some(""), Some(path.as_path()));
        assert_eq!(config.mode, CtrlInitMode::JsonConfig);
        let section: serde_json::Value = serde_json::from_str(&config.payload).unwrap();
        assert_eq!(section["switch"], "on");
        assert_eq!(section["output"], "out");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_no_path_is_dynamic() {
        assert_eq!(ProfilingConfig::from_sources(None, None), ProfilingConfig::dynamic());
        assert_eq!(
            ProfilingConfig::from_sources(None, Some(Path::new(""))),
            ProfilingConfig::dynamic()
        );
    }

    #[test]
    fn test_bad_file_is_dynamic() {
        let missing = std::env::temp_dir().join("acl-prof-definitely-missing.json");
        assert_eq!(
            ProfilingConfig::from_sources(None, Some(missing.as_path())).mode,
            CtrlInitMode::Dynamic
        );

        let garbage = write_config("garbage", "not json");
        assert_eq!(
            ProfilingConfig::from_sources(None, Some(garbage.as_path())).mode,
            CtrlInitMode::Dynamic
        );
        let _ = std::fs::remove_file(garbage);

        let no_section = write_config("no-section", r#"{"dump": {}}"#);
        assert_eq!(
            ProfilingConfig::from_sources(None, Some(no_section.as_path())).mode,
            CtrlInitMode::Dynamic
        );
        let _ = std::fs::remove_file(no_section);
    }
}
