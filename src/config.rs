use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sandbox::Language;

/// Command line agent used as the decision oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Agent used when none is given on the command line
    pub default_agent: String,
    /// Available agents
    pub agents: HashMap<String, AgentSpec>,
    /// Upper bound for a single oracle call
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let mut agents = HashMap::new();
        agents.insert(
            "claude".into(),
            AgentSpec {
                command: "claude".into(),
                args: vec!["-p".into()],
                description: "High quality reasoning. Default decision source".into(),
            },
        );
        agents.insert(
            "gemini".into(),
            AgentSpec {
                command: "gemini".into(),
                args: vec!["-p".into()],
                description: "Fast and cheap. Good for short plans".into(),
            },
        );
        agents.insert(
            "codex".into(),
            AgentSpec {
                command: "codex".into(),
                args: vec!["exec".into()],
                description: "Strong reasoning for code heavy objectives".into(),
            },
        );

        Self {
            default_agent: "claude".into(),
            agents,
            timeout_secs: 300,
        }
    }
}

impl OracleConfig {
    /// Get available agents
    pub fn available_agents(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get agent configuration
    pub fn get_agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.get(name)
    }
}

/// Plan execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive retries allowed on one step. `None` retries without bound.
    pub max_retries: Option<u32>,
    /// Run code attached to step directives through the sandbox
    pub execute_code: bool,
    /// Language for produced code
    pub code_language: Language,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            execute_code: false,
            code_language: Language::Python,
        }
    }
}

/// Sandboxed process runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub default_timeout_secs: u64,
    /// Bytes kept per output stream. `None` keeps everything.
    pub output_limit_bytes: Option<usize>,
    /// Interpreter overrides keyed by language
    pub interpreters: HashMap<Language, PathBuf>,
    /// Parent of the per-run working directories. `None` uses the system temp dir.
    pub work_root: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            output_limit_bytes: None,
            interpreters: HashMap::new(),
            work_root: None,
        }
    }
}

/// Top level configuration read from `<home>/config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub oracle: OracleConfig,
    pub engine: EngineConfig,
    pub runner: RunnerConfig,
}

impl PilotConfig {
    /// Load from config file, falling back to defaults when it is absent
    pub fn load(home: &Path) -> Result<Self> {
        let config_path = home.join("config.json");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Home directory: `.pilot` in the working directory if present, else the user config dir
    pub fn default_home() -> PathBuf {
        let local = PathBuf::from(".pilot");
        if local.is_dir() {
            return local;
        }
        dirs::config_dir()
            .map(|dir| dir.join("pilot"))
            .unwrap_or(local)
    }
}
