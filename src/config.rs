// Layered configuration: defaults, then the project YAML file, then
// ASTROGRAPH_* environment variables. CLI flags are applied last by the binary.

use crate::analysis::link::{LinkPolicy, ResolutionStep};
use crate::analysis::scan::{DEFAULT_MAX_FILE_BYTES, ScanOptions};
use crate::error::AnalysisError;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_CONFIG_FILE: &str = ".astrograph.yml";

/// Analysis configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Parse worker threads, 0 for one per core (ASTROGRAPH_THREADS)
    pub threads: usize,

    /// Files above this size are skipped (ASTROGRAPH_MAX_FILE_BYTES)
    pub max_file_bytes: u64,

    /// Descend through symlinks (ASTROGRAPH_FOLLOW_SYMLINKS)
    pub follow_symlinks: bool,

    /// Ignore .gitignore/.ignore/.astrographignore (ASTROGRAPH_NO_IGNORE)
    pub no_ignore: bool,

    /// Extra gitignore-style exclude globs
    pub exclude: Vec<String>,

    /// Names or fq names always flagged as entrypoints
    pub entrypoints: Vec<String>,

    /// Call linker step order (ASTROGRAPH_LINK_ORDER, comma separated)
    pub link_order: Vec<ResolutionStep>,

    /// Use the content cache
    pub cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 0,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            follow_symlinks: false,
            no_ignore: false,
            exclude: Vec::new(),
            entrypoints: Vec::new(),
            link_order: ResolutionStep::DEFAULT_ORDER.to_vec(),
            cache: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    threads: Option<usize>,
    max_file_bytes: Option<u64>,
    follow_symlinks: Option<bool>,
    no_ignore: Option<bool>,
    exclude: Option<Vec<String>>,
    entrypoints: Option<Vec<String>>,
    link_order: Option<Vec<ResolutionStep>>,
    cache: Option<bool>,
}

impl Config {
    /// Defaults, overlaid with `explicit` (or `<root>/.astrograph.yml` when
    /// present), overlaid with the environment.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, AnalysisError> {
        let mut config = Config::default();
        let path: Option<PathBuf> = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = root.join(PROJECT_CONFIG_FILE);
                candidate.is_file().then_some(candidate)
            }
        };
        if let Some(path) = path {
            let raw = fs::read_to_string(&path).map_err(|err| {
                AnalysisError::Config(format!("read {}: {err}", path.display()))
            })?;
            config.apply_yaml(&raw).map_err(|err| {
                AnalysisError::Config(format!("{}: {err}", path.display()))
            })?;
            tracing::debug!("loaded config from {}", path.display());
        }
        config.apply_env();
        Ok(config)
    }

    pub fn apply_yaml(&mut self, raw: &str) -> Result<(), String> {
        if raw.trim().is_empty() {
            return Ok(());
        }
        let file: ConfigFile = serde_yaml_ng::from_str(raw).map_err(|err| err.to_string())?;
        if let Some(value) = file.threads {
            self.threads = value;
        }
        if let Some(value) = file.max_file_bytes {
            self.max_file_bytes = value;
        }
        if let Some(value) = file.follow_symlinks {
            self.follow_symlinks = value;
        }
        if let Some(value) = file.no_ignore {
            self.no_ignore = value;
        }
        if let Some(value) = file.exclude {
            self.exclude = value;
        }
        if let Some(value) = file.entrypoints {
            self.entrypoints = value;
        }
        if let Some(value) = file.link_order {
            if value.is_empty() {
                return Err("link_order must name at least one step".to_string());
            }
            self.link_order = LinkPolicy::new(value).steps;
        }
        if let Some(value) = file.cache {
            self.cache = value;
        }
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    /// Overlays variables read through `get`. Invalid values are reported and
    /// leave the previous setting in place.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(val) = get("ASTROGRAPH_THREADS") {
            match val.trim().parse() {
                Ok(parsed) => self.threads = parsed,
                Err(_) => tracing::warn!(
                    "invalid ASTROGRAPH_THREADS value: {val}, using {}",
                    self.threads
                ),
            }
        }

        if let Some(val) = get("ASTROGRAPH_MAX_FILE_BYTES") {
            match val.trim().parse() {
                Ok(parsed) => self.max_file_bytes = parsed,
                Err(_) => tracing::warn!(
                    "invalid ASTROGRAPH_MAX_FILE_BYTES value: {val}, using {}",
                    self.max_file_bytes
                ),
            }
        }

        if let Some(val) = get("ASTROGRAPH_FOLLOW_SYMLINKS") {
            match parse_bool(&val) {
                Some(parsed) => self.follow_symlinks = parsed,
                None => tracing::warn!(
                    "invalid ASTROGRAPH_FOLLOW_SYMLINKS value: {val}, using {}",
                    self.follow_symlinks
                ),
            }
        }

        if let Some(val) = get("ASTROGRAPH_NO_IGNORE") {
            match parse_bool(&val) {
                Some(parsed) => self.no_ignore = parsed,
                None => tracing::warn!(
                    "invalid ASTROGRAPH_NO_IGNORE value: {val}, using {}",
                    self.no_ignore
                ),
            }
        }

        if let Some(val) = get("ASTROGRAPH_LINK_ORDER") {
            match LinkPolicy::parse_list(&val) {
                Ok(policy) => self.link_order = policy.steps,
                Err(err) => tracing::warn!("invalid ASTROGRAPH_LINK_ORDER value: {err}"),
            }
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            no_ignore: self.no_ignore,
            follow_symlinks: self.follow_symlinks,
            max_file_bytes: self.max_file_bytes,
            exclude: self.exclude.clone(),
        }
    }

    pub fn link_policy(&self) -> LinkPolicy {
        LinkPolicy::new(self.link_order.clone())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.threads, 0);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert!(config.cache);
        assert_eq!(config.link_order.len(), 5);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut config = Config::default();
        config
            .apply_yaml(
                "threads: 2\nexclude: [\"gen/**\"]\nentrypoints: [serve]\nlink_order: [import, unique_name]\n",
            )
            .unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.exclude, vec!["gen/**".to_string()]);
        assert_eq!(config.entrypoints, vec!["serve".to_string()]);
        assert_eq!(
            config.link_order,
            vec![ResolutionStep::Import, ResolutionStep::UniqueName]
        );
    }

    #[test]
    fn yaml_rejects_unknown_steps_and_keys() {
        let mut config = Config::default();
        assert!(config.apply_yaml("link_order: [guess]\n").is_err());
        assert!(config.apply_yaml("colour: blue\n").is_err());
    }

    #[test]
    fn env_overrides_and_invalid_values_keep_previous() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ASTROGRAPH_THREADS", "3"),
            ("ASTROGRAPH_MAX_FILE_BYTES", "lots"),
            ("ASTROGRAPH_FOLLOW_SYMLINKS", "yes"),
            ("ASTROGRAPH_LINK_ORDER", "module,container"),
        ]);
        let mut config = Config::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.threads, 3);
        assert_eq!(config.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
        assert!(config.follow_symlinks);
        assert_eq!(
            config.link_order,
            vec![ResolutionStep::Module, ResolutionStep::Container]
        );
    }

    #[test]
    fn load_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG_FILE), "max_file_bytes: 1024\ncache: false\n").unwrap();
        let config = Config::load(dir.path(), None).unwrap();
        assert_eq!(config.max_file_bytes, 1024);
        assert!(!config.cache);

        let broken = dir.path().join("broken.yml");
        fs::write(&broken, "threads: [1, 2").unwrap();
        assert!(matches!(
            Config::load(dir.path(), Some(&broken)),
            Err(AnalysisError::Config(_))
        ));
    }
}
