//! Config loading pipeline: discover the file, detect its format, parse,
//! validate.

use std::path::{Path, PathBuf};

use rewind_core::config::{ConfigError, RewindConfig};
use serde::de::DeserializeOwned;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed but a limit is out of range.
    #[error("invalid config in {file}: {source}")]
    Invalid {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .into_iter()
        .find(|f| Some(f.extension()) == ext)
        .ok_or_else(|| ConfigLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan `dir` for `{base_name}.ron`, `.toml` or `.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_config(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, ConfigLoadError> {
    let mut found: Option<PathBuf> = None;

    for format in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{}", format.extension()));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(ConfigLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_error = |detail: String| ConfigLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Load and validate a config file. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<RewindConfig, ConfigLoadError> {
    let config: RewindConfig = deserialize_file(path)?;
    config
        .validate()
        .map_err(|source| ConfigLoadError::Invalid {
            file: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(file = %path.display(), ?config, "config loaded");
    Ok(config)
}

/// Load `{base_name}.*` from `dir`, or the defaults if there is none.
pub fn load_config_from_dir(dir: &Path, base_name: &str) -> Result<RewindConfig, ConfigLoadError> {
    match find_config(dir, base_name)? {
        Some(path) => load_config(&path),
        None => {
            tracing::debug!(dir = %dir.display(), base_name, "no config file, using defaults");
            Ok(RewindConfig::default())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("rewind.ron")).unwrap(), Format::Ron);
        assert_eq!(
            detect_format(Path::new("rewind.toml")).unwrap(),
            Format::Toml
        );
        assert_eq!(
            detect_format(Path::new("rewind.json")).unwrap(),
            Format::Json
        );
    }

    #[test]
    fn detect_format_unsupported() {
        for name in ["rewind.yaml", "rewind"] {
            assert!(matches!(
                detect_format(Path::new(name)),
                Err(ConfigLoadError::UnsupportedFormat { .. })
            ));
        }
    }

    // -----------------------------------------------------------------------
    // find_config
    // -----------------------------------------------------------------------

    #[test]
    fn find_config_single_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rewind.json"), "{}").unwrap();
        let found = find_config(dir.path(), "rewind").unwrap();
        assert_eq!(found, Some(dir.path().join("rewind.json")));
    }

    #[test]
    fn find_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_config(dir.path(), "rewind").unwrap(), None);
    }

    #[test]
    fn find_config_conflict() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rewind.ron"), "()").unwrap();
        fs::write(dir.path().join("rewind.toml"), "").unwrap();
        assert!(matches!(
            find_config(dir.path(), "rewind"),
            Err(ConfigLoadError::ConflictingFormats { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // load_config
    // -----------------------------------------------------------------------

    #[test]
    fn load_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.ron");
        fs::write(&path, "(walk: (max_depth: 64), loop: (max_comment_len: 32))").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.walk.max_depth, 64);
        assert_eq!(config.loops.max_comment_len, 32);
        assert_eq!(config.walk.max_sequence_len, 16 * 1024 * 1024);
    }

    #[test]
    fn load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.toml");
        fs::write(&path, "[loop]\nmax_payload_len = 4096\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.loops.max_payload_len, 4096);
        assert_eq!(config.walk.max_depth, 512);
    }

    #[test]
    fn load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.json");
        fs::write(&path, r#"{"walk": {"max_sequence_len": 1024}}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.walk.max_sequence_len, 1024);
    }

    #[test]
    fn empty_toml_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.toml");
        fs::write(&path, "").unwrap();
        assert_eq!(load_config(&path).unwrap(), RewindConfig::default());
    }

    #[test]
    fn parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.json");
        fs::write(&path, "{ not json").unwrap();
        match load_config(&path) {
            Err(ConfigLoadError::Parse { file, .. }) => assert_eq!(file, path),
            other => panic!("expected Parse, got: {other:?}"),
        }
    }

    #[test]
    fn invalid_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.toml");
        fs::write(&path, "[walk]\nmax_depth = 0\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigLoadError::Invalid { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(&dir.path().join("absent.ron"));
        assert!(matches!(result, Err(ConfigLoadError::Io(_))));
    }

    // -----------------------------------------------------------------------
    // load_config_from_dir
    // -----------------------------------------------------------------------

    #[test]
    fn dir_without_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_dir(dir.path(), "rewind").unwrap();
        assert_eq!(config, RewindConfig::default());
    }

    #[test]
    fn dir_with_config_loads_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rewind.ron"), "(walk: (max_depth: 9))").unwrap();
        let config = load_config_from_dir(dir.path(), "rewind").unwrap();
        assert_eq!(config.walk.max_depth, 9);
    }
}
