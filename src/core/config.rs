use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::ConfigError;
use crate::core::usage::BudgetPeriod;

/// OpenRouter base URL (OpenAI-compatible)
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub model: ModelConfig,

    /// Prepended to every request as the system message
    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub texts: TextsConfig,

    #[serde(default)]
    pub debug: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            data_dir: default_data_dir(),
            api_key: None,
            base_url: default_base_url(),
            model: ModelConfig::default(),
            system_prompt: String::new(),
            history: HistoryConfig::default(),
            stream: StreamConfig::default(),
            budget: BudgetConfig::default(),
            texts: TextsConfig::default(),
            debug: false,
        }
    }
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_data_dir() -> String {
    ".octo-chat".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    /// Output modalities requested from the backend
    #[serde(default = "default_modalities")]
    pub modalities: Vec<String>,
}

fn default_model_name() -> String {
    "google/gemini-2.5-flash-image-preview".into()
}

fn default_max_tokens() -> u64 {
    2000
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.7
}

fn default_modalities() -> Vec<String> {
    vec!["image".into(), "text".into()]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            modalities: default_modalities(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// History is reset once it holds more messages than this
    #[serde(default = "default_history_size")]
    pub max_size: usize,
    /// History is reset after this many idle seconds
    #[serde(default = "default_history_age")]
    pub max_age_secs: u64,
}

fn default_history_size() -> usize {
    10
}

fn default_history_age() -> u64 {
    3600
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: default_history_size(),
            max_age_secs: default_history_age(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_edit_interval")]
    pub edit_interval_ms: u64,
    /// Edit interval once the reply has a full paragraph
    #[serde(default = "default_settled_edit_interval")]
    pub settled_edit_interval_ms: u64,
    #[serde(default = "default_loading_interval")]
    pub loading_interval_ms: u64,
    /// Largest message the UI accepts, in characters
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

fn default_edit_interval() -> u64 {
    500
}

fn default_settled_edit_interval() -> u64 {
    2000
}

fn default_loading_interval() -> u64 {
    500
}

fn default_message_limit() -> usize {
    4096
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            edit_interval_ms: default_edit_interval(),
            settled_edit_interval_ms: default_settled_edit_interval(),
            loading_interval_ms: default_loading_interval(),
            message_limit: default_message_limit(),
        }
    }
}

impl StreamConfig {
    pub fn edit_interval(&self) -> Duration {
        Duration::from_millis(self.edit_interval_ms)
    }

    pub fn settled_edit_interval(&self) -> Duration {
        Duration::from_millis(self.settled_edit_interval_ms)
    }

    pub fn loading_interval(&self) -> Duration {
        Duration::from_millis(self.loading_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    #[serde(default)]
    pub period: BudgetPeriod,
    /// No limit when unset
    #[serde(default)]
    pub limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextsConfig {
    #[serde(default = "default_loading_text")]
    pub loading: String,
    #[serde(default = "default_error_text")]
    pub error: String,
    #[serde(default = "default_busy_text")]
    pub busy: String,
    /// Final text of a reply that produced only images
    #[serde(default = "default_image_only_text")]
    pub image_only: String,
    #[serde(default = "default_cancelled_text")]
    pub cancelled: String,
    #[serde(default = "default_budget_text")]
    pub budget_exceeded: String,
}

fn default_loading_text() -> String {
    "Thinking".into()
}

fn default_error_text() -> String {
    "Something went wrong. Please try again.".into()
}

fn default_busy_text() -> String {
    "Still working on your previous message.".into()
}

fn default_image_only_text() -> String {
    "Image generated.".into()
}

fn default_cancelled_text() -> String {
    "Cancelled.".into()
}

fn default_budget_text() -> String {
    "Usage budget exhausted for this period.".into()
}

impl Default for TextsConfig {
    fn default() -> Self {
        Self {
            loading: default_loading_text(),
            error: default_error_text(),
            busy: default_busy_text(),
            image_only: default_image_only_text(),
            cancelled: default_cancelled_text(),
            budget_exceeded: default_budget_text(),
        }
    }
}

pub fn load_config(working_dir: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let wd = working_dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let mut config = AppConfig {
        working_dir: wd.clone(),
        ..AppConfig::default()
    };

    // Try loading global config
    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("octo-chat").join("config.json");
        if global_path.exists() {
            merge_config(&mut config, read_config_file(&global_path)?);
        }
    }

    // Try loading local project config
    let local_path = wd.join("octo-chat.json");
    if local_path.exists() {
        merge_config(&mut config, read_config_file(&local_path)?);
    }

    detect_api_key(&mut config);
    validate(&config)?;

    Ok(config)
}

fn read_config_file(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::File(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))
}

pub(crate) fn merge_config(base: &mut AppConfig, overlay: AppConfig) {
    if overlay.api_key.is_some() {
        base.api_key = overlay.api_key;
    }
    if overlay.base_url != default_base_url() {
        base.base_url = overlay.base_url;
    }
    if overlay.data_dir != default_data_dir() {
        base.data_dir = overlay.data_dir;
    }
    if overlay.model != ModelConfig::default() {
        base.model = overlay.model;
    }
    if !overlay.system_prompt.is_empty() {
        base.system_prompt = overlay.system_prompt;
    }
    if overlay.history != HistoryConfig::default() {
        base.history = overlay.history;
    }
    if overlay.stream != StreamConfig::default() {
        base.stream = overlay.stream;
    }
    if overlay.budget != BudgetConfig::default() {
        base.budget = overlay.budget;
    }
    if overlay.texts != TextsConfig::default() {
        base.texts = overlay.texts;
    }
    if overlay.debug {
        base.debug = true;
    }
}

fn detect_api_key(config: &mut AppConfig) {
    if config.api_key.is_some() {
        return;
    }
    for env_var in ["OPENROUTER_API_KEY", "API_KEY"] {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                config.api_key = Some(key);
                return;
            }
        }
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.stream.message_limit == 0 {
        return Err(ConfigError::Invalid("stream.message_limit must be > 0".into()));
    }
    if config.model.name.trim().is_empty() {
        return Err(ConfigError::MissingField("model.name".into()));
    }
    Ok(())
}

impl AppConfig {
    pub fn get_api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    pub fn data_path(&self) -> PathBuf {
        self.working_dir.join(&self.data_dir)
    }
}
