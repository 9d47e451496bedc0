//! TOML configuration.
//!
//! Every section except `[db]` and `[corpus]` is optional; missing keys take
//! the defaults below. [`load_config`] parses and validates in one step so
//! the rest of the crate can trust the values.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use lawdex_core::chunk::ChunkerConfig;
use lawdex_core::search::{CategoryRule, FusionParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    /// Semantic index snapshot. Defaults to `<db path>.vectors`.
    #[serde(default)]
    pub vector_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_split_chars")]
    pub split_chars: usize,
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            split_chars: default_split_chars(),
            window_lines: default_window_lines(),
        }
    }
}

fn default_target_chars() -> usize {
    1200
}
fn default_split_chars() -> usize {
    800
}
fn default_window_lines() -> usize {
    20
}

impl ChunkingConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            target_chars: self.target_chars,
            split_chars: self.split_chars,
            window_lines: self.window_lines,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    8
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_parse_workers")]
    pub parse_workers: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parse_workers: default_parse_workers(),
        }
    }
}

fn default_parse_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k_semantic: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k_semantic: default_candidate_k(),
            candidate_k_lexical: default_candidate_k(),
            rrf_k: default_rrf_k(),
            final_limit: default_final_limit(),
            max_query_chars: default_max_query_chars(),
            categories: Vec::new(),
        }
    }
}

fn default_candidate_k() -> usize {
    30
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_final_limit() -> usize {
    20
}
fn default_max_query_chars() -> usize {
    2000
}

/// `[[retrieval.categories]]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    pub name: String,
    pub contains: String,
    pub factor: f64,
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            candidate_k_semantic: self.candidate_k_semantic,
            candidate_k_lexical: self.candidate_k_lexical,
            rrf_k: self.rrf_k,
            final_limit: self.final_limit,
            max_query_chars: self.max_query_chars,
            categories: self
                .categories
                .iter()
                .map(|c| CategoryRule {
                    name: c.name.clone(),
                    contains: c.contains.clone(),
                    factor: c.factor,
                })
                .collect(),
        }
    }
}

impl Config {
    pub fn vector_path(&self) -> PathBuf {
        match &self.index.vector_path {
            Some(p) => p.clone(),
            None => {
                let mut p = self.db.path.clone().into_os_string();
                p.push(".vectors");
                PathBuf::from(p)
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    let chunking = &config.chunking;
    if chunking.target_chars == 0 {
        bail!("chunking.target_chars must be > 0");
    }
    if !(500..=1000).contains(&chunking.split_chars) {
        bail!("chunking.split_chars must be in [500, 1000]");
    }
    if chunking.window_lines == 0 {
        bail!("chunking.window_lines must be >= 1");
    }

    if config.build.parse_workers == 0 {
        bail!("build.parse_workers must be >= 1");
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if retrieval.candidate_k_semantic < 1 || retrieval.candidate_k_lexical < 1 {
        bail!("retrieval candidate counts must be >= 1");
    }
    if !(retrieval.rrf_k > 0.0) {
        bail!("retrieval.rrf_k must be > 0");
    }
    for c in &retrieval.categories {
        if c.contains.is_empty() {
            bail!("retrieval category '{}' has an empty `contains`", c.name);
        }
        if !(c.factor > 0.0) {
            bail!("retrieval category '{}' must have factor > 0", c.name);
        }
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/lawdex.sqlite"

[corpus]
root = "./laws"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.corpus.include_globs, vec!["**/*.md"]);
        assert_eq!(cfg.chunking.target_chars, 1200);
        assert_eq!(cfg.chunking.split_chars, 800);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.embedding.batch_size, 8);
        assert_eq!(cfg.build.parse_workers, 4);
        assert_eq!(cfg.retrieval.candidate_k_semantic, 30);
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.retrieval.final_limit, 20);
        assert_eq!(
            cfg.vector_path(),
            PathBuf::from("./data/lawdex.sqlite.vectors")
        );
    }

    #[test]
    fn categories_become_fusion_rules_in_order() {
        let text = format!(
            "{MINIMAL}\n[[retrieval.categories]]\nname = \"core\"\ncontains = \"民法典\"\nfactor = 1.5\n\n[[retrieval.categories]]\nname = \"cases\"\ncontains = \"案例\"\nfactor = 0.8\n"
        );
        let params = parse_config(&text).unwrap().retrieval.fusion_params();
        assert_eq!(params.categories.len(), 2);
        assert_eq!(params.categories[0].name, "core");
        assert_eq!(params.categories[1].factor, 0.8);
    }

    #[test]
    fn split_chars_is_bounded() {
        let text = format!("{MINIMAL}\n[chunking]\nsplit_chars = 1500\n");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn enabled_provider_requires_model_and_dims() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"ollama\"\nmodel = \"bge-m3\"\n");
        let err = parse_config(&text).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"));

        let text = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"ollama\"\nmodel = \"bge-m3\"\ndims = 1024\n"
        );
        assert!(parse_config(&text).unwrap().embedding.is_enabled());
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse_config(include_str!("../config/lawdex.example.toml")).unwrap();
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.retrieval.categories.len(), 2);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"faiss\"\n");
        assert!(parse_config(&text).is_err());
    }
}
