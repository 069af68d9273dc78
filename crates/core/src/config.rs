//! Configuration surface: TOML relayer config, selected by
//! `DEV_ENV`, with `.env`-driven placeholder substitution. Parsing here is
//! pure (operates on an already-read string); file/env I/O lives in the
//! binaries that embed this crate.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::event::{ChainSide, EventName};

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub project_id: Option<String>,
    pub private_key: Option<String>,
    pub contract_address: String,
    pub deployment_block: u64,
    pub wait_block_validation: u64,
    pub block_validation_second_per_block: u64,
}

#[derive(Debug, Clone)]
pub struct RegisterConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub queue_name: String,
}

#[derive(Debug, Clone)]
pub struct EventRuleConfig {
    pub event_name: EventName,
    pub origin: ChainSide,
    pub has_block_finality: bool,
    pub chain_func_name: Option<ChainSide>,
    pub func_name: Option<String>,
    pub depends_on: Option<EventName>,
}

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub chains: BTreeMap<u64, ChainConfig>,
    pub register: RegisterConfig,
    pub event_rules: BTreeMap<EventName, EventRuleConfig>,
}

impl RelayerConfig {
    pub fn chain(&self, chain_id: u64) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .get(&chain_id)
            .ok_or(ConfigError::BlockchainDataMissing(chain_id))
    }

    pub fn rule(&self, event_name: EventName) -> Result<&EventRuleConfig, ConfigError> {
        self.event_rules
            .get(&event_name)
            .ok_or_else(|| ConfigError::EventRuleKeyError(event_name.to_string()))
    }
}

/// Substitutes `{{ ENV_VAR }}`-style placeholders using Tera.
pub fn substitute_placeholders(
    template: &str,
    env: &HashMap<String, String>,
) -> Result<String, ConfigError> {
    let mut ctx = tera::Context::new();
    for (k, v) in env {
        ctx.insert(k, v);
    }
    tera::Tera::one_off(template, &ctx, false)
        .map_err(|e| ConfigError::PlaceholderTypeError(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TomlRoot {
    #[serde(default, rename = "relayer_blockchain")]
    relayer_blockchain: BTreeMap<String, TomlChain>,
    relayer_register: TomlRegister,
    #[serde(default, rename = "relayer_event_rules")]
    relayer_event_rules: BTreeMap<String, TomlEventRule>,
}

#[derive(Debug, Deserialize)]
struct TomlChain {
    rpc_url: String,
    #[serde(default)]
    rpc_urls: Option<Vec<String>>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    pk: Option<String>,
    smart_contract_address: String,
    smart_contract_deployment_block: u64,
    wait_block_validation: u64,
    block_validation_second_per_block: u64,
}

#[derive(Debug, Deserialize)]
struct TomlRegister {
    host: String,
    port: u16,
    user: String,
    password: String,
    queue_name: String,
}

#[derive(Debug, Deserialize)]
struct TomlEventRule {
    origin: String,
    has_block_finality: bool,
    #[serde(default)]
    chain_func_name: Option<String>,
    #[serde(default)]
    func_name: Option<String>,
    #[serde(default)]
    depends_on: Option<String>,
}

/// Parses the already-rendered TOML content into a `RelayerConfig`.
///
/// Chain table keys look like `ChainId440`; the trailing digits are the
/// chain id, matched case-insensitively against `chainid{chain_id}`.
pub fn parse_relayer_config(rendered_toml: &str) -> Result<RelayerConfig, ConfigError> {
    let root: TomlRoot =
        toml::from_str(rendered_toml).map_err(|e| ConfigError::FileMissing(e.to_string()))?;

    let mut chains = BTreeMap::new();
    for (key, chain) in root.relayer_blockchain {
        let chain_id = parse_chain_id_key(&key)
            .ok_or_else(|| ConfigError::BlockchainDataMissing(0))?;
        let rpc_urls = chain.rpc_urls.unwrap_or_else(|| vec![chain.rpc_url.clone()]);
        chains.insert(
            chain_id,
            ChainConfig {
                chain_id,
                rpc_urls,
                project_id: chain.project_id,
                private_key: chain.pk,
                contract_address: chain.smart_contract_address,
                deployment_block: chain.smart_contract_deployment_block,
                wait_block_validation: chain.wait_block_validation,
                block_validation_second_per_block: chain.block_validation_second_per_block,
            },
        );
    }

    let register = RegisterConfig {
        host: root.relayer_register.host,
        port: root.relayer_register.port,
        user: root.relayer_register.user,
        password: root.relayer_register.password,
        queue_name: root.relayer_register.queue_name,
    };

    let mut event_rules = BTreeMap::new();
    for (key, rule) in root.relayer_event_rules {
        let event_name = EventName::from_str(&key)
            .map_err(|_| ConfigError::EventRuleKeyError(key.clone()))?;
        let origin = ChainSide::from_str(&rule.origin)
            .map_err(|_| ConfigError::EventRuleKeyError(key.clone()))?;
        let chain_func_name = rule
            .chain_func_name
            .map(|s| ChainSide::from_str(&s))
            .transpose()
            .map_err(|_| ConfigError::EventRuleKeyError(key.clone()))?;
        let depends_on = rule
            .depends_on
            .map(|s| EventName::from_str(&s))
            .transpose()
            .map_err(|_| ConfigError::EventRuleKeyError(key.clone()))?;

        event_rules.insert(
            event_name,
            EventRuleConfig {
                event_name,
                origin,
                has_block_finality: rule.has_block_finality,
                chain_func_name,
                func_name: rule.func_name,
                depends_on,
            },
        );
    }

    Ok(RelayerConfig {
        chains,
        register,
        event_rules,
    })
}

fn parse_chain_id_key(key: &str) -> Option<u64> {
    let lower = key.to_ascii_lowercase();
    let digits: String = lower
        .strip_prefix("chainid")?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
