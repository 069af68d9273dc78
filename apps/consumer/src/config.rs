use std::collections::HashMap;

use anyhow::{Context, Result};
use relayer_chain::AlloyDispatcherConfig;
use relayer_core::config::{parse_relayer_config, substitute_placeholders, RelayerConfig};
use serde::Deserialize;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConsumerEnv {
    database_url: String,
    db_max_connections: u32,
    relayer_config_path: String,
}

impl Default for ConsumerEnv {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            relayer_config_path: "config/relayer.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub relayer: RelayerConfig,
}

pub fn load_config() -> Result<AppConfig> {
    let env: ConsumerEnv = envy::from_env().context("load consumer env config")?;
    if env.database_url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }

    let template = std::fs::read_to_string(&env.relayer_config_path)
        .with_context(|| format!("read relayer config at {}", env.relayer_config_path))?;

    let env_vars: HashMap<String, String> = std::env::vars().collect();
    let rendered = substitute_placeholders(&template, &env_vars)
        .context("render relayer config placeholders")?;
    let relayer = parse_relayer_config(&rendered).context("parse relayer config")?;

    Ok(AppConfig {
        database_url: env.database_url,
        db_max_connections: env.db_max_connections,
        relayer,
    })
}

/// Builds the dispatcher's per-chain rpc/contract/key maps from the same
/// relayer config the scanners use.
pub fn dispatcher_config(relayer: &RelayerConfig) -> Result<AlloyDispatcherConfig> {
    let mut rpc_urls = HashMap::new();
    let mut contract_addresses = HashMap::new();
    let mut private_keys = HashMap::new();

    for (chain_id, chain) in &relayer.chains {
        rpc_urls.insert(*chain_id, chain.rpc_urls.clone());
        contract_addresses.insert(
            *chain_id,
            chain
                .contract_address
                .parse()
                .with_context(|| format!("invalid contract address for chain_id={chain_id}"))?,
        );
        if let Some(pk) = &chain.private_key {
            let bytes = hex::decode(pk.trim_start_matches("0x"))
                .with_context(|| format!("invalid private key for chain_id={chain_id}"))?;
            let key: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("private key for chain_id={chain_id} is not 32 bytes"))?;
            private_keys.insert(*chain_id, key);
        }
    }

    Ok(AlloyDispatcherConfig {
        rpc_urls,
        contract_addresses,
        private_keys,
    })
}
