use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub llm_api_base: String,
    pub generation_model: String,
    pub analysis_model: String,
    pub embedding_model: String,
    pub server_address: String,
    pub data_dir: PathBuf,
    pub max_concurrent_tasks: usize,
    pub max_retries: u32,
    pub request_delay_ms: u64,
    pub bm25_top_n: usize,
    pub final_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub http_timeout_secs: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("GOOGLE_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            api_key,
            llm_api_base: get_env_or(
                "LLM_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta/openai",
            ),
            generation_model: get_env_or("GENERATION_MODEL", "gemini-1.5-pro-latest"),
            analysis_model: get_env_or("ANALYSIS_MODEL", "gemini-2.5-pro"),
            embedding_model: get_env_or("EMBEDDING_MODEL", "text-embedding-004"),
            server_address: get_env_or("SERVER_ADDRESS", "127.0.0.1:8080"),
            data_dir: PathBuf::from(get_env_or("DATA_DIR", "data")),
            max_concurrent_tasks: get_env_parse_or("MAX_CONCURRENT_TASKS", 5)?,
            max_retries: get_env_parse_or("MAX_RETRIES", 3)?,
            request_delay_ms: get_env_parse_or("REQUEST_DELAY_MS", 1200)?,
            bm25_top_n: get_env_parse_or("BM25_TOP_N", 30)?,
            final_top_k: get_env_parse_or("FINAL_TOP_K", 10)?,
            chunk_size: get_env_parse_or("CHUNK_SIZE", 1000)?,
            chunk_overlap: get_env_parse_or("CHUNK_OVERLAP", 100)?,
            embed_batch_size: get_env_parse_or("EMBED_BATCH_SIZE", 100)?,
            http_timeout_secs: get_env_parse_or("HTTP_TIMEOUT_SECS", 120)?,
        })
    }

    /// The API key, or a configuration error for commands that call the model API.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::Config("Missing environment variable: GEMINI_API_KEY".to_string())
        })
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn exam_questions_file(&self) -> PathBuf {
        self.data_dir.join("exam_questions.yaml")
    }

    pub fn processed_questions_file(&self) -> PathBuf {
        self.data_dir.join("exam_questions_final.yaml")
    }

    pub fn glossary_file(&self) -> PathBuf {
        self.data_dir.join("master_glossary.yaml")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn report_file(&self) -> PathBuf {
        self.data_dir.join("undecided_questions_report.md")
    }

    pub fn patch_file(&self) -> PathBuf {
        self.data_dir.join("patch_for_undecided.yaml")
    }
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let mut config = Config::from_env().expect("defaults parse");
        config.api_key = None;
        let err = config.require_api_key().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let mut config = Config::from_env().expect("defaults parse");
        config.data_dir = PathBuf::from("/tmp/exam");
        assert_eq!(config.index_dir(), PathBuf::from("/tmp/exam/index"));
        assert_eq!(
            config.processed_questions_file(),
            PathBuf::from("/tmp/exam/exam_questions_final.yaml")
        );
    }

    #[test]
    fn client_timeout_comes_from_config() {
        let mut config = Config::from_env().expect("defaults parse");
        config.http_timeout_secs = 240;
        assert_eq!(config.http_timeout(), Duration::from_secs(240));
    }
}
