use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_twins::configs::TwinsConfig;
use serde::{Deserialize, Serialize};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Digital twins state ingestion service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TWINS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TWINS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TWINS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TWINS_NOTIFY_CHANNEL", help = "Channel for operation notifications.")]
    pub notify_channel: Option<String>,

    #[clap(long, env = "TWINS_TOKENS", help = "Access tokens as token=identity pairs, comma separated.")]
    pub tokens: Option<String>,
}

/// Fully resolved settings for the server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub twins: TwinsConfig,
    pub tokens: HashMap<String, String>,
}

impl Config {
    fn into_layer(self) -> TwinsConfig {
        TwinsConfig {
            notify_channel: self.notify_channel,
            log_dir: self.log_dir,
            log_level: self.log_level,
        }
    }
}

/// Parses `token=identity` pairs separated by commas.
pub fn parse_tokens(raw: &str) -> Result<HashMap<String, String>> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((token, identity)) = pair.split_once('=') else {
            bail!("invalid token pair '{}', expected token=identity", pair);
        };
        let (token, identity) = (token.trim(), identity.trim());
        if token.is_empty() || identity.is_empty() {
            bail!("invalid token pair '{}', empty token or identity", pair);
        }
        tokens.insert(token.to_string(), identity.to_string());
    }
    Ok(tokens)
}

pub fn load_config() -> Result<ServerConfig> {
    // 1. Pick up a .env file if one is present.
    let _ = dotenvy::dotenv();

    // 2. CLI arguments, which clap already merged with environment variables.
    let cli_args = Config::parse();

    // 3. Defaults, the config file and TWINS_* variables, then CLI on top.
    let base = TwinsConfig::load(cli_args.config_path.as_deref()).context("loading twins config")?;

    let tokens = match &cli_args.tokens {
        Some(raw) => parse_tokens(raw)?,
        None => HashMap::new(),
    };

    let twins = base.merge(cli_args.into_layer());

    Ok(ServerConfig { twins, tokens })
}
