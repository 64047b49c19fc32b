//! Experiment configuration: typed structures, YAML loading, and
//! normalization of the legacy single-provider schema.
//!
//! The legacy shape (`provider`/`generation`/`models`/`judge` at top level)
//! normalizes into the multi-provider shape under the reserved key
//! `"default"`; nothing downstream can tell which schema was used.
//! Configuration errors are fatal at startup: a run never begins with a
//! partially valid config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
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
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unknown suite: {0}")]
    UnknownSuite(String),
    #[error("suite {suite} references unknown provider: {provider}")]
    UnknownProvider { suite: String, provider: String },
    #[error("suite {suite} references unknown judge: {judge}")]
    UnknownJudge { suite: String, judge: String },
    #[error("judge {judge} references unknown provider: {provider}")]
    UnknownJudgeProvider { judge: String, provider: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_s: f64,
    pub max_delay_s: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub timeout_s: f64,
    pub concurrency: usize,
    pub retries: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub top_p: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub confidence_threshold: f64,
    pub rubric_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    pub temperatures: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub name: String,
    pub provider: String,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub judge: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPaths {
    pub scenarios_path: PathBuf,
    pub frames_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run_id: Option<String>,
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub resume: bool,
}

/// Fully resolved configuration. Core components only ever see this shape.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentConfig {
    pub run: RunConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub generation_defaults: GenerationDefaults,
    pub judges: BTreeMap<String, JudgeConfig>,
    pub suites: Vec<SuiteConfig>,
    pub inputs: InputPaths,
}

impl ExperimentConfig {
    /// Select a suite by name, or the first suite when unnamed.
    pub fn suite(&self, name: Option<&str>) -> Result<&SuiteConfig, ConfigError> {
        match name {
            Some(name) => self
                .suites
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| ConfigError::UnknownSuite(name.to_string())),
            None => self
                .suites
                .first()
                .ok_or_else(|| ConfigError::Invalid("suites must be non-empty".into())),
        }
    }
}

// =============================================================================
// Raw file schemas
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawConfigFile {
    run: RunConfig,
    inputs: InputPaths,

    // New schema.
    providers: Option<BTreeMap<String, ProviderConfig>>,
    generation_defaults: Option<GenerationDefaults>,
    judges: Option<BTreeMap<String, JudgeConfig>>,
    suites: Option<Vec<SuiteConfig>>,

    // Legacy schema.
    provider: Option<LegacyProvider>,
    generation: Option<GenerationDefaults>,
    models: Option<Vec<ModelSpec>>,
    judge: Option<LegacyJudge>,
}

#[derive(Debug, Deserialize)]
struct LegacyProvider {
    name: String,
    timeout_s: f64,
    concurrency: usize,
    retries: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct LegacyJudge {
    enabled: bool,
    model: String,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    confidence_threshold: f64,
    rubric_path: PathBuf,
}

// =============================================================================
// Loading
// =============================================================================

pub fn load_experiment_config(path: &Path) -> Result<ExperimentConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfigFile =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
    let cfg = normalize(raw)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn normalize(raw: RawConfigFile) -> Result<ExperimentConfig, ConfigError> {
    if raw.providers.is_some() {
        let providers = raw.providers.unwrap();
        let generation_defaults = raw
            .generation_defaults
            .ok_or_else(|| ConfigError::Invalid("missing generation_defaults".into()))?;
        let judges = raw
            .judges
            .ok_or_else(|| ConfigError::Invalid("missing judges".into()))?;
        let suites = raw
            .suites
            .ok_or_else(|| ConfigError::Invalid("missing suites".into()))?;
        return Ok(ExperimentConfig {
            run: raw.run,
            providers,
            generation_defaults,
            judges,
            suites,
            inputs: raw.inputs,
        });
    }

    // Legacy shape degenerates into a single "default" provider/judge/suite.
    let provider = raw
        .provider
        .ok_or_else(|| ConfigError::Invalid("missing provider".into()))?;
    let generation = raw
        .generation
        .ok_or_else(|| ConfigError::Invalid("missing generation".into()))?;
    let models = raw
        .models
        .ok_or_else(|| ConfigError::Invalid("missing models".into()))?;
    let judge = raw
        .judge
        .ok_or_else(|| ConfigError::Invalid("missing judge".into()))?;

    let mut providers = BTreeMap::new();
    providers.insert(
        "default".to_string(),
        ProviderConfig {
            provider_type: provider.name,
            timeout_s: provider.timeout_s,
            concurrency: provider.concurrency,
            retries: provider.retries,
        },
    );

    let mut judges = BTreeMap::new();
    judges.insert(
        "default".to_string(),
        JudgeConfig {
            enabled: judge.enabled,
            provider: "default".to_string(),
            model: judge.model,
            temperature: judge.temperature,
            max_tokens: judge.max_tokens,
            top_p: judge.top_p,
            confidence_threshold: judge.confidence_threshold,
            rubric_path: judge.rubric_path,
        },
    );

    let suites = vec![SuiteConfig {
        name: "default".to_string(),
        provider: "default".to_string(),
        models,
        judge: Some("default".to_string()),
    }];

    Ok(ExperimentConfig {
        run: raw.run,
        providers,
        generation_defaults: generation,
        judges,
        suites,
        inputs: raw.inputs,
    })
}

fn validate(cfg: &ExperimentConfig) -> Result<(), ConfigError> {
    if cfg.providers.is_empty() {
        return Err(ConfigError::Invalid("providers must be non-empty".into()));
    }
    if cfg.suites.is_empty() {
        return Err(ConfigError::Invalid("suites must be non-empty".into()));
    }
    for (key, provider) in &cfg.providers {
        if provider.concurrency == 0 {
            return Err(ConfigError::Invalid(format!(
                "providers.{key}.concurrency must be >= 1"
            )));
        }
        if provider.timeout_s <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "providers.{key}.timeout_s must be > 0"
            )));
        }
    }
    for (key, judge) in &cfg.judges {
        if !cfg.providers.contains_key(&judge.provider) {
            return Err(ConfigError::UnknownJudgeProvider {
                judge: key.clone(),
                provider: judge.provider.clone(),
            });
        }
    }
    for suite in &cfg.suites {
        if !cfg.providers.contains_key(&suite.provider) {
            return Err(ConfigError::UnknownProvider {
                suite: suite.name.clone(),
                provider: suite.provider.clone(),
            });
        }
        if let Some(judge) = &suite.judge {
            if !cfg.judges.contains_key(judge) {
                return Err(ConfigError::UnknownJudge {
                    suite: suite.name.clone(),
                    judge: judge.clone(),
                });
            }
        }
        if suite.models.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "suite {} has no models",
                suite.name
            )));
        }
        for model in &suite.models {
            if model.temperatures.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "model {} in suite {} has no temperatures",
                    model.model, suite.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_SCHEMA: &str = r#"
run:
  output_dir: outputs
  resume: true
inputs:
  scenarios_path: scenarios.yaml
  frames_path: frames.yaml
providers:
  anthropic_main:
    type: anthropic
    timeout_s: 60.0
    concurrency: 4
    retries:
      max_retries: 3
      base_delay_s: 1.0
      max_delay_s: 30.0
      jitter: true
generation_defaults:
  max_tokens: 1024
  top_p: 0.95
judges:
  strict:
    enabled: true
    provider: anthropic_main
    model: claude-3-5-haiku-latest
    temperature: 0.0
    max_tokens: 512
    top_p: 1.0
    confidence_threshold: 0.7
    rubric_path: rubric.md
suites:
  - name: main
    provider: anthropic_main
    judge: strict
    models:
      - model: claude-sonnet-4-20250514
        temperatures: [0.0, 0.7]
"#;

    const LEGACY_SCHEMA: &str = r#"
run:
  output_dir: outputs
inputs:
  scenarios_path: scenarios.yaml
  frames_path: frames.yaml
provider:
  name: anthropic
  timeout_s: 60.0
  concurrency: 4
  retries:
    max_retries: 3
    base_delay_s: 1.0
    max_delay_s: 30.0
generation:
  max_tokens: 1024
  top_p: 0.95
models:
  - model: claude-sonnet-4-20250514
    temperatures: [0.0, 0.7]
judge:
  enabled: true
  model: claude-3-5-haiku-latest
  temperature: 0.0
  max_tokens: 512
  top_p: 1.0
  confidence_threshold: 0.7
  rubric_path: rubric.md
"#;

    fn parse(text: &str) -> Result<ExperimentConfig, ConfigError> {
        let raw: RawConfigFile = serde_yaml::from_str(text).unwrap();
        let cfg = normalize(raw)?;
        validate(&cfg)?;
        Ok(cfg)
    }

    #[test]
    fn new_schema_parses() {
        let cfg = parse(NEW_SCHEMA).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.suites[0].name, "main");
        assert_eq!(cfg.suites[0].judge.as_deref(), Some("strict"));
        assert!(cfg.judges["strict"].enabled);
    }

    #[test]
    fn legacy_schema_normalizes_to_default_keys() {
        let cfg = parse(LEGACY_SCHEMA).unwrap();
        assert_eq!(cfg.providers["default"].provider_type, "anthropic");
        assert_eq!(cfg.suites.len(), 1);
        assert_eq!(cfg.suites[0].name, "default");
        assert_eq!(cfg.suites[0].judge.as_deref(), Some("default"));
        assert_eq!(cfg.judges["default"].provider, "default");
        // Jitter defaults on when absent.
        assert!(cfg.providers["default"].retries.jitter);
    }

    #[test]
    fn legacy_and_new_resolve_identical_generation_defaults() {
        let a = parse(NEW_SCHEMA).unwrap();
        let b = parse(LEGACY_SCHEMA).unwrap();
        assert_eq!(a.generation_defaults.max_tokens, b.generation_defaults.max_tokens);
        assert_eq!(a.generation_defaults.top_p, b.generation_defaults.top_p);
    }

    #[test]
    fn unknown_suite_provider_is_fatal() {
        let text = NEW_SCHEMA.replace("provider: anthropic_main\n    judge", "provider: missing\n    judge");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }

    #[test]
    fn unknown_judge_reference_is_fatal() {
        let text = NEW_SCHEMA.replace("judge: strict", "judge: lenient");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownJudge { .. }));
    }

    #[test]
    fn zero_concurrency_is_fatal() {
        let text = NEW_SCHEMA.replace("concurrency: 4", "concurrency: 0");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn suite_lookup_by_name_and_default() {
        let cfg = parse(NEW_SCHEMA).unwrap();
        assert_eq!(cfg.suite(Some("main")).unwrap().name, "main");
        assert_eq!(cfg.suite(None).unwrap().name, "main");
        assert!(matches!(
            cfg.suite(Some("nope")),
            Err(ConfigError::UnknownSuite(_))
        ));
    }
}
