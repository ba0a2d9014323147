use rollcall_core::Thresholds;
use rollcall_imaging::Conditioner;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Runtime configuration.
///
/// Built from defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory for the default store, log and model locations.
    pub data_dir: PathBuf,
    /// Identity store; `.db`/`.sqlite`/`.sqlite3` selects SQLite, anything else CSV.
    pub store_path: PathBuf,
    /// Attendance CSV log.
    pub attendance_log: PathBuf,
    /// Directory holding `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    pub match_threshold: f32,
    pub duplicate_threshold: f32,
    /// Minimum SCRFD score for a detection to be kept.
    pub detection_confidence: f32,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    /// TrueType font for annotation labels; boxes only when unset.
    pub label_font: Option<PathBuf>,
    /// HS256 secret for bearer tokens.
    pub jwt_secret: Option<String>,
}

/// Fields a config file may set. Anything left out keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileLayer {
    store_path: Option<PathBuf>,
    attendance_log: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    duplicate_threshold: Option<f32>,
    detection_confidence: Option<f32>,
    clahe_clip_limit: Option<f32>,
    clahe_tiles: Option<u32>,
    label_font: Option<PathBuf>,
    jwt_secret: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration reading variables through `env`.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let mut config = Self::defaults(data_dir);

        let file = match env("ROLLCALL_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(config.data_dir.join("rollcall.toml")).filter(|p| p.exists()),
        };
        if let Some(path) = file {
            config.apply_file(&path)?;
        }

        config.apply_env(&env);
        Ok(config)
    }

    /// Built-in defaults rooted at `data_dir`.
    pub fn defaults(data_dir: PathBuf) -> Self {
        let conditioner = Conditioner::default();
        let thresholds = Thresholds::default();
        Self {
            store_path: data_dir.join("registered_students.csv"),
            attendance_log: data_dir.join("attendance.csv"),
            model_dir: data_dir.join("models"),
            data_dir,
            match_threshold: thresholds.matching,
            duplicate_threshold: thresholds.duplicate,
            detection_confidence: rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            clahe_clip_limit: conditioner.clip_limit,
            clahe_tiles: conditioner.tiles,
            label_font: None,
            jwt_secret: None,
        }
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let layer: FileLayer = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");

        let FileLayer {
            store_path,
            attendance_log,
            model_dir,
            match_threshold,
            duplicate_threshold,
            detection_confidence,
            clahe_clip_limit,
            clahe_tiles,
            label_font,
            jwt_secret,
        } = layer;

        set(&mut self.store_path, store_path);
        set(&mut self.attendance_log, attendance_log);
        set(&mut self.model_dir, model_dir);
        set(&mut self.match_threshold, match_threshold);
        set(&mut self.duplicate_threshold, duplicate_threshold);
        set(&mut self.detection_confidence, detection_confidence);
        set(&mut self.clahe_clip_limit, clahe_clip_limit);
        set(&mut self.clahe_tiles, clahe_tiles);
        if label_font.is_some() {
            self.label_font = label_font;
        }
        if jwt_secret.is_some() {
            self.jwt_secret = jwt_secret;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        set(&mut self.store_path, env("ROLLCALL_STORE_PATH").map(PathBuf::from));
        set(&mut self.attendance_log, env("ROLLCALL_ATTENDANCE_LOG").map(PathBuf::from));
        set(&mut self.model_dir, env("ROLLCALL_MODEL_DIR").map(PathBuf::from));
        set(&mut self.match_threshold, env_parse(env, "ROLLCALL_MATCH_THRESHOLD"));
        set(&mut self.duplicate_threshold, env_parse(env, "ROLLCALL_DUPLICATE_THRESHOLD"));
        set(&mut self.detection_confidence, env_parse(env, "ROLLCALL_DETECTION_CONFIDENCE"));
        set(&mut self.clahe_clip_limit, env_parse(env, "ROLLCALL_CLAHE_CLIP_LIMIT"));
        set(&mut self.clahe_tiles, env_parse(env, "ROLLCALL_CLAHE_TILES"));
        if let Some(font) = env("ROLLCALL_LABEL_FONT") {
            self.label_font = Some(PathBuf::from(font));
        }
        if let Some(secret) = env("ROLLCALL_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            matching: self.match_threshold,
            duplicate: self.duplicate_threshold,
        }
    }

    pub fn conditioner(&self) -> Conditioner {
        Conditioner::new(self.clahe_clip_limit, self.clahe_tiles)
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Parsed env value; unparsable values are ignored.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_under_xdg_data_home() {
        let config = Config::from_lookup(lookup(&[("XDG_DATA_HOME", "/nonexistent/xdg")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/nonexistent/xdg/rollcall"));
        assert_eq!(config.store_path, PathBuf::from("/nonexistent/xdg/rollcall/registered_students.csv"));
        assert_eq!(config.attendance_log, PathBuf::from("/nonexistent/xdg/rollcall/attendance.csv"));
        assert_eq!(config.model_dir, PathBuf::from("/nonexistent/xdg/rollcall/models"));
        assert_eq!(config.thresholds(), Thresholds::default());
        assert_eq!(config.clahe_tiles, 8);
        assert!(config.label_font.is_none());
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn test_home_fallback() {
        let config = Config::from_lookup(lookup(&[("HOME", "/nonexistent/home")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/nonexistent/home/.local/share/rollcall"));
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "match_threshold = 0.72\nduplicate_threshold = 0.9\nstore_path = \"/srv/ids.db\"\n",
        )
        .unwrap();

        let config = Config::from_lookup(lookup(&[
            ("XDG_DATA_HOME", "/nonexistent"),
            ("ROLLCALL_CONFIG", path.to_str().unwrap()),
            ("ROLLCALL_MATCH_THRESHOLD", "0.75"),
            ("ROLLCALL_JWT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.match_threshold, 0.75);
        assert_eq!(config.duplicate_threshold, 0.9);
        assert_eq!(config.store_path, PathBuf::from("/srv/ids.db"));
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_config_file_found_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("rollcall");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("rollcall.toml"), "clahe_tiles = 4\n").unwrap();

        let config = Config::from_lookup(lookup(&[("XDG_DATA_HOME", dir.path().to_str().unwrap())])).unwrap();
        assert_eq!(config.clahe_tiles, 4);
        assert_eq!(config.conditioner(), Conditioner::new(2.0, 4));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "match_threshold = \"high\"\n").unwrap();

        let err = Config::from_lookup(lookup(&[("ROLLCALL_CONFIG", path.to_str().unwrap())])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = Config::from_lookup(lookup(&[("ROLLCALL_CONFIG", "/nonexistent/rollcall.toml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("XDG_DATA_HOME", "/nonexistent"),
            ("ROLLCALL_DUPLICATE_THRESHOLD", "very"),
            ("ROLLCALL_CLAHE_TILES", " 16 "),
        ]))
        .unwrap();
        assert_eq!(config.duplicate_threshold, 0.80);
        assert_eq!(config.clahe_tiles, 16);
    }
}
