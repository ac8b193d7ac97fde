use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub confluence: ConfluenceConfig,
    pub workspace: WorkspaceConfig,
    pub budgets: BudgetConfig,
    pub filters: FilterConfig,
    pub pipeline: PipelineConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// LLM provider credentials and defaults. API keys are server-side only
/// and never serialized back out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub default_provider: String,
    pub default_model: String,
    pub fast_model: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

/// Cluster key -> data-platform workspace URL directory. Access tokens are
/// resolved from the environment per cluster (WORKSPACE_<KEY>_TOKEN) so they
/// never live in the config file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub clusters: HashMap<String, String>,
}

impl WorkspaceConfig {
    pub fn resolve(&self, cluster_key: &str) -> Option<ResolvedWorkspace> {
        let key = cluster_key.trim().to_uppercase();
        let url = self.clusters.get(&key)?.clone();
        let token = std::env::var(format!("WORKSPACE_{}_TOKEN", key)).ok()?;
        Some(ResolvedWorkspace { key, url, token })
    }
}

/// Resolved workspace credentials for one cluster. The token is never
/// exposed through the API surface.
#[derive(Debug, Clone)]
pub struct ResolvedWorkspace {
    pub key: String,
    pub url: String,
    pub token: String,
}

/// Per-document token budgets for the authoring stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub doc_01_master: u32,
    pub doc_02_schema: u32,
    pub doc_03_business: u32,
    pub doc_04_filters: u32,
    pub doc_05_patterns: u32,
    pub focus_doc: u32,
    pub max_focus_docs: usize,
    pub max_payload_chars: usize,
}

/// Thresholds for WHERE-condition tier classification.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub mandatory_pct: f64,
    pub table_default_pct: f64,
    pub common_pct: f64,
    pub max_enum_distinct: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded fan-out width against any single upstream.
    pub max_workers: usize,
    /// SQL dialect passed to the parser (sqlparser dialect name).
    pub dialect: String,
    pub top_glossary_cols: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_tool_rounds: usize,
    pub max_output_tokens: u32,
    pub sanitize_max_output_tokens: u32,
    pub history_window: usize,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "prism")]
#[command(version, about = "Prism - Organizational Context Library Generator")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g. "info,prism=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_; secrets unprefixed)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_LOG_LEVEL
    /// - ANTHROPIC_API_KEY / OPENAI_API_KEY
    /// - CONFLUENCE_URL / CONFLUENCE_EMAIL / CONFLUENCE_API_TOKEN
    /// - WORKSPACE_<CLUSTER>_TOKEN (read at resolution time, not here)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
                tracing::info!("Override server.port from env: {}", self.server.port);
            }
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        // Secrets only ever come from the environment.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                self.llm.anthropic_api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.llm.openai_api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("CONFLUENCE_URL") {
            if !url.is_empty() {
                self.confluence.url = Some(url);
            }
        }
        if let Ok(email) = std::env::var("CONFLUENCE_EMAIL") {
            if !email.is_empty() {
                self.confluence.email = Some(email);
            }
        }
        if let Ok(token) = std::env::var("CONFLUENCE_API_TOKEN") {
            if !token.is_empty() {
                self.confluence.api_token = Some(token);
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.pipeline.max_workers == 0 {
            anyhow::bail!("pipeline.max_workers must be > 0");
        }

        if !(0.0..=1.0).contains(&self.filters.mandatory_pct)
            || !(0.0..=1.0).contains(&self.filters.table_default_pct)
            || !(0.0..=1.0).contains(&self.filters.common_pct)
        {
            anyhow::bail!("filter thresholds must be fractions in [0, 1]");
        }

        if self.llm.anthropic_api_key.is_none() && self.llm.openai_api_key.is_none() {
            tracing::warn!(
                "No LLM API key configured — authoring stages will fail until one is set"
            );
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/prism.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,prism=debug".to_string(), file: Some("logs/prism.log".to_string()) }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            default_provider: "anthropic".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            fast_model: "claude-haiku-4-5".to_string(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            doc_01_master: 2000,
            doc_02_schema: 3000,
            doc_03_business: 3000,
            doc_04_filters: 2000,
            doc_05_patterns: 4000,
            focus_doc: 3000,
            max_focus_docs: 3,
            max_payload_chars: 200_000,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mandatory_pct: 0.50,
            table_default_pct: 0.30,
            common_pct: 0.10,
            max_enum_distinct: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_workers: 8, dialect: "hive".to_string(), top_glossary_cols: 20 }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            max_output_tokens: 8192,
            sanitize_max_output_tokens: 64000,
            history_window: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budgets.max_focus_docs, 3);
        assert_eq!(config.filters.mandatory_pct, 0.50);
    }

    #[test]
    fn workspace_resolution_requires_token_env() {
        let mut ws = WorkspaceConfig::default();
        ws.clusters
            .insert("EU".to_string(), "https://workspace-eu.example.com".to_string());
        // No WORKSPACE_EU_TOKEN in the test environment.
        assert!(ws.resolve("eu").is_none());
        assert!(ws.resolve("unknown").is_none());
    }
}
