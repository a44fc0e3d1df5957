//! Environment derivation from a service record
//!
//! The template decides which keys are written and in which order. For every
//! template key the value comes from the computed set first, then from the
//! service's declared variables. Empty values are dropped, and any non-empty
//! key of the previous snapshot that was not rewritten is carried forward.

use super::EnvSnapshot;
use crate::chains::SupportedChain;
use crate::error::ConfigurationError;
use crate::service::ServiceRecord;
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};

const MAX_DELIVERY_RATE: &str = "MECH_TO_MAX_DELIVERY_RATE";

/// Rewrite the snapshot from `record`, using `template` for layout.
pub fn derive_environment(
    record: &ServiceRecord,
    template: &EnvSnapshot,
    previous: &EnvSnapshot,
    offchain_url: &str,
) -> Result<EnvSnapshot, ConfigurationError> {
    let home_chain = record
        .home_chain
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ConfigurationError::ServiceRecord("Missing `home_chain` in operate service config.".to_string()))?;
    let chain: SupportedChain = home_chain.parse()?;

    let multisig = record.home_multisig().ok_or_else(|| {
        ConfigurationError::ServiceRecord(format!("Missing safe address for `{}` in operate chain config.", home_chain))
    })?;

    let rpc_var = chain.rpc_var();
    let chain_rpc = declared_string(record, &rpc_var)
        .or_else(|| {
            record
                .home_chain_config()
                .map(|c| c.ledger_config.rpc.clone())
                .filter(|rpc| !rpc.is_empty())
        })
        .ok_or_else(|| {
            ConfigurationError::ServiceRecord(format!(
                "Missing `{}` in operate env variables for chain `{}`.",
                rpc_var, home_chain
            ))
        })?;

    let mut computed: HashMap<String, Value> = HashMap::new();
    computed.insert("SAFE_CONTRACT_ADDRESS".to_string(), Value::String(multisig.to_string()));
    computed.insert(
        "ALL_PARTICIPANTS".to_string(),
        Value::Array(record.agent_addresses.iter().cloned().map(Value::String).collect()),
    );
    computed.insert(MAX_DELIVERY_RATE.to_string(), delivery_rates(record)?);

    // Record fallbacks, used only when the declared variable is empty
    let mut fallbacks: HashMap<String, Value> = HashMap::new();
    fallbacks.insert("DEFAULT_CHAIN_ID".to_string(), Value::String(chain.as_str().to_string()));
    fallbacks.insert(rpc_var.clone(), Value::String(chain_rpc.clone()));
    fallbacks.insert(chain.chain_id_var(), Value::Number(chain.chain_id().into()));
    if let Some(token) = record
        .home_chain_config()
        .and_then(|c| c.chain_data.token)
        .filter(|t| *t > 0)
    {
        fallbacks.insert("ON_CHAIN_SERVICE_ID".to_string(), Value::Number(token.into()));
    }

    let mut derived = EnvSnapshot::new();
    let mut written: HashSet<String> = HashSet::new();

    for line in template.template_lines() {
        let key = match line {
            Ok((key, _)) => key,
            Err(text) => {
                derived.push_raw(text);
                continue;
            }
        };

        let value = computed
            .get(key)
            .cloned()
            .or_else(|| record.declared(key).cloned().filter(|v| !is_placeholder(v)))
            .filter(|v| !is_empty(v))
            .or_else(|| fallbacks.get(key).cloned());

        if let Some(value) = value.filter(|v| !is_empty(v)) {
            derived.push(key, format_value(&value));
            written.insert(key.to_string());
        }
    }

    let aliases = [
        ("MECHX_CHAIN_RPC", chain_rpc.as_str()),
        ("MECHX_LEDGER_ADDRESS", chain_rpc.as_str()),
        ("MECHX_CHAIN_CONFIG", chain.as_str()),
        ("MECHX_MECH_OFFCHAIN_URL", offchain_url),
    ];
    for (key, value) in aliases {
        if !value.is_empty() {
            derived.push(key, value.to_string());
            written.insert(key.to_string());
        }
    }

    for (key, value) in previous.entries() {
        if !value.trim().is_empty() && !written.contains(key) {
            derived.push(key, value.to_string());
            written.insert(key.to_string());
        }
    }

    Ok(derived)
}

fn declared_string(record: &ServiceRecord, key: &str) -> Option<String> {
    record
        .declared(key)
        .filter(|v| !is_empty(v) && !is_placeholder(v))
        .map(format_value)
}

/// `"null"` marks a variable the platform fills in later
fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == "null")
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Strings verbatim, numbers in decimal, booleans as `true`/`false`,
/// objects and arrays as compact JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Declared delivery-rate map with every rate coerced to an integer
fn delivery_rates(record: &ServiceRecord) -> Result<Value, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidValue {
        key: MAX_DELIVERY_RATE.to_string(),
        reason,
    };

    let parsed = match record.declared(MAX_DELIVERY_RATE) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| invalid(format!("not valid JSON: {}", e)))?,
        Some(other) => other.clone(),
    };

    let Value::Object(rates) = parsed else {
        return Err(invalid("expected a JSON object".to_string()));
    };

    let mut coerced = Map::new();
    for (mech, rate) in rates {
        let number = match &rate {
            Value::Number(n) if n.is_u64() || n.is_i64() => n.clone(),
            Value::String(s) => parse_integer(s.trim()).ok_or_else(|| invalid(format!("rate for {} is not an integer: {}", mech, s)))?,
            other => return Err(invalid(format!("rate for {} is not an integer: {}", mech, other))),
        };
        coerced.insert(mech, Value::Number(number));
    }
    Ok(Value::Object(coerced))
}

fn parse_integer(s: &str) -> Option<Number> {
    s.parse::<u64>()
        .map(Number::from)
        .or_else(|_| s.parse::<i64>().map(Number::from))
        .ok()
}
