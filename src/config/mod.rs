//! Reading and writing notebook configuration files.
//!
//! The format is chosen from the file extension: JSON, YAML, TOML and XML
//! map to a [`serde_json::Value`], anything else is plain text.

pub mod xml;

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::downloaders::http;

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path} as {format}: {message}")]
    Parse {
        path: PathBuf,
        format: ConfigFormat,
        message: String,
    },

    #[error("Failed to write {path} as {format}: {message}")]
    Serialize {
        path: PathBuf,
        format: ConfigFormat,
        message: String,
    },

    #[error("{path} is {format}, which needs {expected}")]
    Shape {
        path: PathBuf,
        format: ConfigFormat,
        expected: &'static str,
    },

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn parse(path: &Path, format: ConfigFormat, message: impl Display) -> Self {
        ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message: message.to_string(),
        }
    }

    fn serialize(path: &Path, format: ConfigFormat, message: impl Display) -> Self {
        ConfigError::Serialize {
            path: path.to_path_buf(),
            format,
            message: message.to_string(),
        }
    }
}

/// On-disk configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
    Xml,
    Text,
}

impl ConfigFormat {
    /// Format for `path` by extension (case-insensitive); unknown is text
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "json" => ConfigFormat::Json,
            "yaml" | "yml" => ConfigFormat::Yaml,
            "toml" => ConfigFormat::Toml,
            "xml" => ConfigFormat::Xml,
            _ => ConfigFormat::Text,
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigFormat::Json => "JSON",
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Xml => "XML",
            ConfigFormat::Text => "text",
        };
        f.write_str(name)
    }
}

/// Parsed configuration contents
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Structured(Value),
    Text(String),
}

impl ConfigValue {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            ConfigValue::Structured(v) => Some(v),
            ConfigValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            ConfigValue::Structured(_) => None,
        }
    }
}

/// Read and parse a configuration file
pub fn read_config(path: &Path) -> Result<ConfigValue, ConfigError> {
    let format = ConfigFormat::from_path(path);
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    debug!("Reading {} as {}", path.display(), format);

    let value = match format {
        ConfigFormat::Text => return Ok(ConfigValue::Text(content)),
        ConfigFormat::Json => {
            serde_json::from_str(&content).map_err(|e| ConfigError::parse(path, format, e))?
        }
        ConfigFormat::Yaml if content.trim().is_empty() => Value::Null,
        ConfigFormat::Yaml => {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::parse(path, format, e))?
        }
        ConfigFormat::Toml => {
            toml::from_str(&content).map_err(|e| ConfigError::parse(path, format, e))?
        }
        ConfigFormat::Xml => xml::parse(&content).map_err(|e| ConfigError::parse(path, format, e))?,
    };

    Ok(ConfigValue::Structured(value))
}

fn to_json_pretty(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Serialize `config` in the format implied by `path` and write it out
pub fn write_config(path: &Path, config: &ConfigValue) -> Result<(), ConfigError> {
    let format = ConfigFormat::from_path(path);
    let shape = |expected| ConfigError::Shape {
        path: path.to_path_buf(),
        format,
        expected,
    };

    let content = match (format, config) {
        (ConfigFormat::Text, ConfigValue::Text(text)) => text.clone(),
        (ConfigFormat::Text, ConfigValue::Structured(_)) => return Err(shape("a text value")),
        (_, ConfigValue::Text(_)) => return Err(shape("a structured value")),
        (ConfigFormat::Json, ConfigValue::Structured(v)) => {
            to_json_pretty(v).map_err(|e| ConfigError::serialize(path, format, e))?
        }
        (ConfigFormat::Yaml, ConfigValue::Structured(v)) => {
            serde_yaml::to_string(v).map_err(|e| ConfigError::serialize(path, format, e))?
        }
        (ConfigFormat::Toml, ConfigValue::Structured(v)) => {
            if !v.is_object() {
                return Err(shape("a table at the top level"));
            }
            toml::to_string_pretty(v).map_err(|e| ConfigError::serialize(path, format, e))?
        }
        (ConfigFormat::Xml, ConfigValue::Structured(v)) => {
            xml::to_string(v).map_err(|e| ConfigError::serialize(path, format, e))?
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| ConfigError::io(path, e))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Replace every occurrence of `old` with `new`, line by line.
///
/// Returns how many lines changed. The file is left untouched when nothing
/// matches.
pub fn change_line(path: &Path, old: &str, new: &str) -> Result<usize, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

    let mut changed = 0;
    let updated: String = content
        .split_inclusive('\n')
        .map(|line| {
            if !old.is_empty() && line.contains(old) {
                changed += 1;
                line.replace(old, new)
            } else {
                line.to_string()
            }
        })
        .collect();

    if changed > 0 {
        std::fs::write(path, updated).map_err(|e| ConfigError::io(path, e))?;
        debug!("Changed {} lines in {}", changed, path.display());
    }
    Ok(changed)
}

/// Raw-text URL for a Pastebin id or link
pub fn pastebin_url(id: &str) -> String {
    if id.contains("pastebin.com") {
        if id.contains("/raw") {
            id.to_string()
        } else {
            id.replacen("pastebin.com", "pastebin.com/raw", 1)
        }
    } else {
        format!("https://pastebin.com/raw/{}", id)
    }
}

/// Fetch a paste and split it into lines
pub fn read_pastebin(id: &str) -> Result<Vec<String>, ConfigError> {
    let url = pastebin_url(id);
    let fetch_err = |message: String| ConfigError::Fetch {
        url: url.clone(),
        message,
    };

    let client = http::client().map_err(|e| fetch_err(format!("{:#}", e)))?;
    let text = client
        .get(&url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| fetch_err(e.to_string()))?;

    Ok(text.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.xml")), ConfigFormat::Xml);
        assert_eq!(ConfigFormat::from_path(Path::new("style.css")), ConfigFormat::Text);
        assert_eq!(ConfigFormat::from_path(Path::new("README")), ConfigFormat::Text);
    }

    #[test]
    fn test_json_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ui-config.json");
        let value = ConfigValue::Structured(json!({"txt2img/Steps/value": 30, "theme": "dark"}));

        write_config(&path, &value).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n    \"theme\": \"dark\""));
        assert_eq!(read_config(&path).unwrap(), value);
    }

    #[test]
    fn test_yaml_and_toml() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("config.yaml");
        std::fs::write(&yaml, "model:\n  name: sd15\n  steps: 20\n").unwrap();
        assert_eq!(
            read_config(&yaml).unwrap(),
            ConfigValue::Structured(json!({"model": {"name": "sd15", "steps": 20}}))
        );

        let toml_path = dir.path().join("settings.toml");
        let value = ConfigValue::Structured(json!({"server": {"port": 7860, "share": true}}));
        write_config(&toml_path, &value).unwrap();
        assert_eq!(read_config(&toml_path).unwrap(), value);
    }

    #[test]
    fn test_empty_yaml_is_null() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.yml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(read_config(&path).unwrap(), ConfigValue::Structured(Value::Null));
    }

    #[test]
    fn test_xml_roundtrip_through_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.xml");
        let value = ConfigValue::Structured(json!({"root": {"@v": "1", "item": ["a", "b"]}}));

        write_config(&path, &value).unwrap();

        assert_eq!(read_config(&path).unwrap(), value);
    }

    #[test]
    fn test_text_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        write_config(&path, &ConfigValue::Text("hello\n".into())).unwrap();
        assert_eq!(read_config(&path).unwrap().as_text(), Some("hello\n"));
    }

    #[test]
    fn test_shape_mismatch() {
        let dir = tempdir().unwrap();
        let err = write_config(&dir.path().join("a.json"), &ConfigValue::Text("x".into())).unwrap_err();
        assert!(matches!(err, ConfigError::Shape { .. }));

        let err = write_config(&dir.path().join("a.toml"), &ConfigValue::Structured(json!([1]))).unwrap_err();
        assert!(matches!(err, ConfigError::Shape { .. }));

        let err = write_config(&dir.path().join("a.txt"), &ConfigValue::Structured(json!({}))).unwrap_err();
        assert!(matches!(err, ConfigError::Shape { .. }));
    }

    #[test]
    fn test_parse_error_names_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_config(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { format: ConfigFormat::Json, .. }));
        assert!(err.to_string().contains("as JSON"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_config(&dir.path().join("none.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_change_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("webui.sh");
        std::fs::write(&path, "use_venv=1\nexport X=1\nuse_venv=1 # again\nlast").unwrap();

        let changed = change_line(&path, "use_venv=1", "use_venv=0").unwrap();

        assert_eq!(changed, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "use_venv=0\nexport X=1\nuse_venv=0 # again\nlast"
        );
        assert_eq!(change_line(&path, "missing", "x").unwrap(), 0);
    }

    #[test]
    fn test_pastebin_url() {
        assert_eq!(pastebin_url("abc123"), "https://pastebin.com/raw/abc123");
        assert_eq!(
            pastebin_url("https://pastebin.com/abc123"),
            "https://pastebin.com/raw/abc123"
        );
        assert_eq!(
            pastebin_url("https://pastebin.com/raw/abc123"),
            "https://pastebin.com/raw/abc123"
        );
    }
}
