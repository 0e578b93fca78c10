//! Engine configuration: database path, IMAP defaults and the LLM endpoint.
//! Loaded from a TOML file under the user's config directory, created with
//! sane defaults on first run.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_imap_server")]
    pub imap_server: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
}

fn default_db_path() -> String {
    "/data/inbox_cleaner.db".to_string()
}
fn default_imap_server() -> String {
    "imap.mail.me.com".to_string()
}
fn default_imap_port() -> u16 {
    993
}
fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            imap_server: default_imap_server(),
            imap_port: default_imap_port(),
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("inbox-cleaner"))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let sample = Config::default();
        let toml = toml::to_string_pretty(&sample)?;
        fs::write(&path, toml)?;
        return Ok(sample);
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}
