use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "~/.config/surveyor/";
pub const DATABASE_FILE: &str = "surveyor.db";

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 3000,
            timeout_secs: 55,
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Where spec files are written, relative paths resolve against `data_dir`.
    pub generated_dir: PathBuf,
    pub results_dir: PathBuf,
    pub max_depth: usize,
    pub max_pages: usize,
    pub navigation_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub workers: usize,
    pub runner_timeout_secs: u64,
    /// Program and leading arguments of the test runner.
    pub runner_command: Vec<String>,
    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: expand_path(DEFAULT_DATA_DIR),
            generated_dir: PathBuf::from("generated-tests"),
            results_dir: PathBuf::from("test-results"),
            max_depth: 3,
            max_pages: 100,
            navigation_timeout_secs: 15,
            probe_timeout_secs: 5,
            workers: 2,
            runner_timeout_secs: 300,
            runner_command: vec![
                "npx".to_string(),
                "playwright".to_string(),
                "test".to_string(),
            ],
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// Overlay variables from `lookup`. Unparseable numbers are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = non_empty("SURVEYOR_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = non_empty("SURVEYOR_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(workers) = non_empty("SURVEYOR_WORKERS").and_then(|w| w.trim().parse().ok()) {
            self.workers = workers;
        }
        if let Some(runner) = non_empty("SURVEYOR_RUNNER") {
            self.runner_command = runner.split_whitespace().map(str::to_string).collect();
        }
    }

    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = expand_path(dir);
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn generated_path(&self) -> PathBuf {
        self.resolve(&self.generated_dir)
    }

    pub fn results_path(&self) -> PathBuf {
        self.resolve(&self.results_dir)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_secs(self.runner_timeout_secs)
    }
}
