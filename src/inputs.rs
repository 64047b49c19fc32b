//! Scenario and frame inputs, plus prompt rendering.
//!
//! Rendering is deliberately small: `{{VAR}}` placeholders are substituted
//! from the scenario's variable map and unknown placeholders are left
//! verbatim so missing fills stay visible in the logs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("yaml error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid inputs: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    /// Grouping tag for downstream aggregation only; never affects execution.
    pub trench: String,
    pub title: String,
    pub base_prompt: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    scenarios: Vec<Scenario>,
}

#[derive(Debug, Deserialize)]
struct FrameFile {
    frames: Vec<Frame>,
}

pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, InputError> {
    let file: ScenarioFile = load_yaml(path)?;
    if file.scenarios.is_empty() {
        return Err(InputError::Invalid(format!(
            "no scenarios in {}",
            path.display()
        )));
    }
    Ok(file.scenarios)
}

pub fn load_frames(path: &Path) -> Result<Vec<Frame>, InputError> {
    let file: FrameFile = load_yaml(path)?;
    if file.frames.is_empty() {
        return Err(InputError::Invalid(format!(
            "no frames in {}",
            path.display()
        )));
    }
    Ok(file.frames)
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| InputError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid pattern"));

/// Substitute `{{VAR}}` placeholders; unknown variables are left as-is.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            variables
                .get(key)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Final prompt text: frame prefix + rendered scenario prompt + frame suffix.
pub fn build_prompt_text(scenario: &Scenario, frame: &Frame) -> String {
    let rendered = render_template(&scenario.base_prompt, &scenario.variables);
    format!("{}{}{}", frame.prefix, rendered, frame.suffix)
}
