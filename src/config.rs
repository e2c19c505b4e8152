use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub scrapers: ScraperConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings for the scraper process runner and the JSON combiner.
#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    /// Directory holding the scraper scripts and their JSON output files.
    pub dir: PathBuf,
    /// Interpreter the scripts are launched with (e.g. `python3`).
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Glob selecting which files in `dir` count as runnable scripts.
    #[serde(default = "default_script_glob")]
    pub script_glob: String,
    /// Globs selecting which files in `dir` are candidate JSON sources.
    #[serde(default = "default_source_globs")]
    pub source_globs: Vec<String>,
    /// Name of the combined output file, written into `dir`.
    #[serde(default = "default_combined_output")]
    pub combined_output: String,
    /// Per-script wall-clock budget before termination is requested.
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
    /// How long a script gets between SIGTERM and SIGKILL.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    /// Upper bound on the whole run; stragglers are abandoned past this.
    #[serde(default = "default_safety")]
    pub safety_secs: u64,
}

fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_script_glob() -> String {
    "*.py".to_string()
}
fn default_source_globs() -> Vec<String> {
    vec!["*.json".to_string()]
}
fn default_combined_output() -> String {
    "data.json".to_string()
}
fn default_script_timeout() -> u64 {
    60
}
fn default_grace() -> u64 {
    5
}
fn default_safety() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Character budget per chunk.
    pub chunk_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap_chars: usize,
}

fn default_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks pulled from the notification index per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunks pulled from the session's uploaded document per query.
    #[serde(default = "default_top_m_doc")]
    pub top_m_doc: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_m_doc: default_top_m_doc(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_top_m_doc() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions endpoint (Groq by default).
    #[serde(default = "default_llm_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Context is truncated to this many characters before prompting.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_context_chars: default_max_context_chars(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_context_chars() -> usize {
    15_000
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    3
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_max_upload_mb() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Uploaded-document context expires this many seconds after upload.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
        }
    }
}

fn default_session_ttl() -> u64 {
    3600
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate scrapers
    if config.scrapers.timeout_secs == 0 {
        anyhow::bail!("scrapers.timeout_secs must be > 0");
    }
    if config.scrapers.safety_secs < config.scrapers.timeout_secs {
        anyhow::bail!("scrapers.safety_secs must be >= scrapers.timeout_secs");
    }
    if config.scrapers.combined_output.is_empty() {
        anyhow::bail!("scrapers.combined_output must not be empty");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate llm
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}
