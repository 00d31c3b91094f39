use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;

use design_session::types::DEFAULT_DEPTH;

const BASEDIR_ENV: &str = "DSESS_BASEDIR";
const KNOWN_KEYS: [&str; 3] = ["basedir", "depth", "color"];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory that holds `<name>.session`; the working directory when unset.
    pub basedir: Option<PathBuf>,
    pub depth: usize,
    pub color: bool,
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    basedir: Option<PathBuf>,
    depth: Option<usize>,
    color: Option<bool>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        if let Ok(dir) = env::var(BASEDIR_ENV) {
            if !dir.is_empty() {
                config.basedir = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::with_path(path));
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let file_config: FileConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        Ok(Self {
            basedir: file_config.basedir,
            depth: file_config.depth.unwrap_or(DEFAULT_DEPTH).max(1),
            color: file_config.color.unwrap_or(true),
            path: path.to_path_buf(),
        })
    }

    fn with_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn display(&self) -> String {
        let basedir = self
            .basedir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "(current directory)".to_string());
        [
            format!("config file: {}", self.path.display()),
            format!("basedir = {basedir}"),
            format!("depth   = {}", self.depth),
            format!("color   = {}", self.color),
        ]
        .join("\n")
    }

    /// Update one key in the user config file. Returns the previous value, if any.
    pub fn set_value(key: &str, value: &str) -> Result<Option<String>> {
        set_value_in(&config_path(), key, value)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            basedir: None,
            depth: DEFAULT_DEPTH,
            color: true,
            path: config_path(),
        }
    }
}

/// Edit the TOML document in place so comments and unrelated keys survive.
pub fn set_value_in(path: &Path, key: &str, value: &str) -> Result<Option<String>> {
    if !KNOWN_KEYS.contains(&key) {
        bail!(
            "unknown config key '{key}' (available: {})",
            KNOWN_KEYS.join(", ")
        );
    }

    let contents = if path.exists() {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?
    } else {
        String::new()
    };
    let mut doc: DocumentMut = contents
        .parse()
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    let old_value = doc
        .get(key)
        .and_then(|item| item.as_value())
        .map(|value| value.to_string().trim().trim_matches('"').to_string());

    doc[key] = match key {
        "depth" => {
            let depth: i64 = value
                .parse()
                .map_err(|_| anyhow!("depth must be a positive integer, got '{value}'"))?;
            if depth < 1 {
                bail!("depth must be a positive integer, got '{value}'");
            }
            toml_edit::value(depth)
        }
        "color" => {
            let color: bool = value
                .parse()
                .map_err(|_| anyhow!("color must be true or false, got '{value}'"))?;
            toml_edit::value(color)
        }
        _ => toml_edit::value(value),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    fs::write(path, doc.to_string())
        .with_context(|| format!("failed to write config file: {}", path.display()))?;

    Ok(old_value)
}

fn config_path() -> PathBuf {
    if let Ok(dir) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&dir).join("design-session").join("config.toml");
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join(".config")
        .join("design-session")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.depth, DEFAULT_DEPTH);
        assert!(config.color);
        assert!(config.basedir.is_none());
    }

    #[test]
    fn test_load_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "basedir = \"/tmp/work\"\ndepth = 7\ncolor = false\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.basedir, Some(PathBuf::from("/tmp/work")));
        assert_eq!(config.depth, 7);
        assert!(!config.color);
    }

    #[test]
    fn test_set_value_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "# my sessions\ndepth = 10\n").unwrap();

        let old = set_value_in(&path, "depth", "20").unwrap();
        assert_eq!(old.as_deref(), Some("10"));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# my sessions"));
        assert_eq!(Config::load_from(&path).unwrap().depth, 20);
    }

    #[test]
    fn test_set_value_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let old = set_value_in(&path, "basedir", "/srv/sessions").unwrap();
        assert!(old.is_none());
        assert_eq!(
            Config::load_from(&path).unwrap().basedir,
            Some(PathBuf::from("/srv/sessions"))
        );
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(set_value_in(&path, "theme", "x").is_err());
        assert!(set_value_in(&path, "depth", "0").is_err());
        assert!(set_value_in(&path, "depth", "many").is_err());
        assert!(set_value_in(&path, "color", "sometimes").is_err());
        assert!(!path.exists());
    }
}
