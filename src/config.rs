use std::{collections::HashMap, env, net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::policy::{PolicyTable, RatePolicy};

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub bind_addr: SocketAddr,
    pub policies: PolicyTable,
    pub token_header: String,
    pub backend: StorageBackendConfig,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    InMemory,
    Redis { url: String, op_timeout: Duration },
}

impl LimiterConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let by_ip = RatePolicy {
            max_requests_per_second: parse_env("LIMIT_BY_IP_MAX_RPS", 10u32),
            block_time: Duration::from_millis(parse_env("LIMIT_BY_IP_BLOCK_TIME_MS", 60_000u64)),
        };

        let by_token = RatePolicy {
            max_requests_per_second: parse_env("LIMIT_BY_TOKEN_MAX_RPS", 100u32),
            block_time: Duration::from_millis(parse_env(
                "LIMIT_BY_TOKEN_BLOCK_TIME_MS",
                30_000u64,
            )),
        };

        let token_overrides =
            parse_custom_tokens(&env::var("CUSTOM_TOKENS").unwrap_or_default())?;

        let backend = match env::var("RATE_LIMIT_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" | "in_memory" => StorageBackendConfig::InMemory,
            "redis" => StorageBackendConfig::Redis {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                op_timeout: Duration::from_millis(parse_env("REDIS_TIMEOUT_MS", 500u64)),
            },
            other => return Err(anyhow!("unsupported RATE_LIMIT_BACKEND: {other}")),
        };

        Ok(Self {
            bind_addr,
            policies: PolicyTable {
                by_ip,
                by_token,
                token_overrides,
            },
            token_header: env::var("TOKEN_HEADER").unwrap_or_else(|_| "API_KEY".to_string()),
            backend,
        })
    }
}

/// `TOKEN=max_rps@block_ms`, comma separated: `ABC=20@3000,DEF=20@3000`.
/// The block time may be omitted and defaults to 3000 ms.
fn parse_custom_tokens(raw: &str) -> Result<HashMap<String, RatePolicy>> {
    let mut out = HashMap::new();
    for chunk in raw.split(',').filter(|c| !c.trim().is_empty()) {
        let mut parts = chunk.splitn(2, '=');
        let token = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("invalid custom token entry: {chunk}"))?
            .to_string();
        let rhs = parts
            .next()
            .map(str::trim)
            .ok_or_else(|| anyhow!("invalid custom token entry: {chunk}"))?;

        let spec: Vec<&str> = rhs.split('@').collect();
        let max_requests_per_second = spec
            .first()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .ok_or_else(|| anyhow!("invalid max rps for token {token}"))?;
        let block_ms = spec
            .get(1)
            .map(|s| s.trim().parse::<u64>().context("invalid block time"))
            .transpose()?
            .unwrap_or(3_000);

        out.insert(
            token,
            RatePolicy {
                max_requests_per_second,
                block_time: Duration::from_millis(block_ms),
            },
        );
    }
    Ok(out)
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::parse_custom_tokens;

    #[test]
    fn parses_the_custom_token_table() {
        let table = parse_custom_tokens("ABC=20@3000, DEF=5@500").unwrap();
        assert_eq!(table.len(), 2);

        let abc = &table["ABC"];
        assert_eq!(abc.max_requests_per_second, 20);
        assert_eq!(abc.block_time.as_millis(), 3_000);

        let def = &table["DEF"];
        assert_eq!(def.max_requests_per_second, 5);
        assert_eq!(def.block_time.as_millis(), 500);
    }

    #[test]
    fn block_time_defaults_when_omitted() {
        let table = parse_custom_tokens("ABC=20").unwrap();
        assert_eq!(table["ABC"].block_time.as_millis(), 3_000);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_custom_tokens("ABC").is_err());
        assert!(parse_custom_tokens("=20@100").is_err());
        assert!(parse_custom_tokens("ABC=twenty").is_err());
    }

    #[test]
    fn empty_table_is_fine() {
        assert!(parse_custom_tokens("").unwrap().is_empty());
    }
}
