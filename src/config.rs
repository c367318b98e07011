//! Configuration (A3 of the ambient stack): env-driven, loaded once at
//! startup. Mirrors §6 of the design: every key has a documented default
//! so the gateway runs stand-alone with zero configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_delay_ms: u64,
    pub log_retention_days: u32,
    pub log_cleanup_hour: u32,
    pub gateway_port: u16,
    pub database_url: Option<String>,
    pub log_filter: String,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let log_cleanup_hour: u32 = env_or("LOG_CLEANUP_HOUR", 3)?;
    if log_cleanup_hour > 23 {
        anyhow::bail!("LOG_CLEANUP_HOUR must be between 0 and 23, got {log_cleanup_hour}");
    }

    Ok(Config {
        http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT", 60)?),
        retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3)?,
        retry_delay_ms: env_or("RETRY_DELAY_MS", 1000)?,
        log_retention_days: env_or("LOG_RETENTION_DAYS", 30)?,
        log_cleanup_hour,
        gateway_port: env_or("GATEWAY_PORT", 8080)?,
        database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        log_filter: std::env::var("RUST_LOG").or_else(|_| std::env::var("GATEWAY_LOG")).unwrap_or_else(|_| "info".into()),
    })
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("{key} is set but not a valid value: {v:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        std::env::remove_var("SOME_UNSET_GATEWAY_KEY");
        let v: u32 = env_or("SOME_UNSET_GATEWAY_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }
}
