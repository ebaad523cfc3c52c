use crate::units::Length;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub timings: bool,
    pub page: PageConfig,
    pub citations: CitationsConfig,
    pub node: NodeConfig,
}

/// Page size used for pagination; letter when unset.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PageConfig {
    pub width: Option<Length>,
    pub height: Option<Length>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CitationsConfig {
    pub locale: String,
}

impl Default for CitationsConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub command: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            command: "node".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display(path),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display(path),
            source,
        })?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        let locale = self.citations.locale.trim();
        self.citations.locale = if locale.is_empty() {
            "en-US".into()
        } else {
            locale.to_string()
        };
        if self.node.command.trim().is_empty() {
            self.node.command = "node".into();
        }
        for length in [&mut self.page.width, &mut self.page.height] {
            if matches!(length, Some(Length::Text(t)) if t.trim().is_empty()) {
                *length = None;
            }
        }
    }

    /// The node invocation split like a shell would.
    pub fn node_command(&self) -> Vec<String> {
        let command = &self.node.command;
        shell_words::split(command).unwrap_or_else(|_| vec![command.clone()])
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn default_config_path(input_path: &Path) -> PathBuf {
    let dir = input_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join("pagemark.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_letter_and_en_us() {
        let config = Config::default();
        assert!(config.page.width.is_none());
        assert_eq!(config.citations.locale, "en-US");
        assert_eq!(config.node_command(), vec!["node"]);
    }

    #[test]
    fn loads_mixed_length_forms() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "timings = true\n[page]\nwidth = 794\nheight = \"297mm\"\n[citations]\nlocale = \" \"\n[node]\ncommand = \"node --max-old-space-size=4096\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert!(config.timings);
        assert_eq!(config.page.width, Some(Length::Pixels(794.0)));
        assert_eq!(config.page.height, Some(Length::Text("297mm".into())));
        assert_eq!(config.citations.locale, "en-US");
        assert_eq!(
            config.node_command(),
            vec!["node", "--max-old-space-size=4096"]
        );
    }

    #[test]
    fn blank_length_means_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[page]\nwidth = \"\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.page.width.is_none());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[page\nwidth = 1").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&display(file.path())));
    }

    #[test]
    fn config_sits_next_to_input() {
        let path = default_config_path(Path::new("docs/report.html"));
        assert_eq!(path, PathBuf::from("docs/pagemark.toml"));
    }
}
