//! Application configuration loaded from environment variables.

use std::str::FromStr;

use pageframe_core::ProxyConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8090").
    pub bind_addr: String,

    /// Prometheus `/metrics` port. 0 disables the metrics server.
    pub metrics_port: u16,

    /// Pipeline settings.
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset or empty values keep the default
    /// from [`ProxyConfig::default`]. Values that do not parse are errors.
    ///
    /// - `PAGEFRAME_BIND_ADDR`: Server bind address (default: "0.0.0.0:8090")
    /// - `PAGEFRAME_TIMEOUT_MS`: Fetch timeout (default: 8000)
    /// - `PAGEFRAME_MAX_REDIRECTS`: Redirect limit (default: 5)
    /// - `PAGEFRAME_MAX_BODY_BYTES`: Body size limit (default: 20 MiB)
    /// - `PAGEFRAME_CACHE_TTL_MS`: Proxied page TTL (default: 300000)
    /// - `PAGEFRAME_PAGE_CACHE_TTL_MS`: Wrapper page TTL (default: 600000)
    /// - `PAGEFRAME_CACHE_CAPACITY`: Entries per cache (default: 1000)
    /// - `PAGEFRAME_CACHE_SWEEP_INTERVAL_MS`: Sweep period (default: 60000)
    /// - `PAGEFRAME_MAX_CONNECTIONS`: Concurrent fetches (default: 256)
    /// - `PAGEFRAME_MAX_CONNECTIONS_PER_HOST`: Concurrent fetches per host (default: 16)
    /// - `PAGEFRAME_STREAMING_THRESHOLD_BYTES`: Rewriter strategy switch (default: 2 MiB)
    /// - `PAGEFRAME_ALLOW_LOOPBACK`: Allow loopback targets (default: false)
    /// - `PAGEFRAME_EXPOSE_DIAGNOSTICS`: Raw error details in responses (default: false)
    /// - `METRICS_PORT`: Metrics server port, 0 to disable (default: 0)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("PAGEFRAME_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let defaults = ProxyConfig::default();
        let proxy = ProxyConfig {
            timeout_ms: env_parse("PAGEFRAME_TIMEOUT_MS", defaults.timeout_ms)?,
            max_redirects: env_parse("PAGEFRAME_MAX_REDIRECTS", defaults.max_redirects)?,
            max_body_bytes: env_parse("PAGEFRAME_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            cache_ttl_ms: env_parse("PAGEFRAME_CACHE_TTL_MS", defaults.cache_ttl_ms)?,
            page_cache_ttl_ms: env_parse(
                "PAGEFRAME_PAGE_CACHE_TTL_MS",
                defaults.page_cache_ttl_ms,
            )?,
            cache_capacity: env_parse("PAGEFRAME_CACHE_CAPACITY", defaults.cache_capacity)?,
            cache_sweep_interval_ms: env_parse(
                "PAGEFRAME_CACHE_SWEEP_INTERVAL_MS",
                defaults.cache_sweep_interval_ms,
            )?,
            max_connections: env_parse("PAGEFRAME_MAX_CONNECTIONS", defaults.max_connections)?,
            max_connections_per_host: env_parse(
                "PAGEFRAME_MAX_CONNECTIONS_PER_HOST",
                defaults.max_connections_per_host,
            )?,
            streaming_threshold_bytes: env_parse(
                "PAGEFRAME_STREAMING_THRESHOLD_BYTES",
                defaults.streaming_threshold_bytes,
            )?,
            allow_loopback: env_flag("PAGEFRAME_ALLOW_LOOPBACK", defaults.allow_loopback)?,
            expose_diagnostics: env_flag(
                "PAGEFRAME_EXPOSE_DIAGNOSTICS",
                defaults.expose_diagnostics,
            )?,
            ..defaults
        };

        let metrics_port = env_parse("METRICS_PORT", 0u16)?;

        for (name, value) in [
            ("PAGEFRAME_TIMEOUT_MS", proxy.timeout_ms),
            ("PAGEFRAME_CACHE_CAPACITY", proxy.cache_capacity),
            ("PAGEFRAME_CACHE_SWEEP_INTERVAL_MS", proxy.cache_sweep_interval_ms),
            ("PAGEFRAME_MAX_CONNECTIONS", proxy.max_connections as u64),
            (
                "PAGEFRAME_MAX_CONNECTIONS_PER_HOST",
                proxy.max_connections_per_host as u64,
            ),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than 0");
            }
        }

        if proxy.allow_loopback {
            tracing::warn!("loopback targets are allowed; do not use this setting in production");
        }
        if proxy.expose_diagnostics {
            tracing::warn!("raw error details are exposed to callers");
        }

        tracing::info!(
            bind_addr = %bind_addr,
            timeout_ms = proxy.timeout_ms,
            max_redirects = proxy.max_redirects,
            max_body_bytes = proxy.max_body_bytes,
            cache_ttl_ms = proxy.cache_ttl_ms,
            cache_capacity = proxy.cache_capacity,
            metrics_port,
            "pageframe configuration loaded"
        );

        Ok(Self {
            bind_addr,
            metrics_port,
            proxy,
        })
    }
}

/// Parse `key` if set and non-empty, else return `default`.
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key} ({raw:?}): {e}")),
        _ => Ok(default),
    }
}

/// Parse a boolean flag: `1/0`, `true/false`, `yes/no`, `on/off`.
fn env_flag(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("invalid value for {key} ({raw:?}): expected true or false"),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "PAGEFRAME_BIND_ADDR",
        "PAGEFRAME_TIMEOUT_MS",
        "PAGEFRAME_MAX_REDIRECTS",
        "PAGEFRAME_MAX_BODY_BYTES",
        "PAGEFRAME_CACHE_TTL_MS",
        "PAGEFRAME_PAGE_CACHE_TTL_MS",
        "PAGEFRAME_CACHE_CAPACITY",
        "PAGEFRAME_CACHE_SWEEP_INTERVAL_MS",
        "PAGEFRAME_MAX_CONNECTIONS",
        "PAGEFRAME_MAX_CONNECTIONS_PER_HOST",
        "PAGEFRAME_STREAMING_THRESHOLD_BYTES",
        "PAGEFRAME_ALLOW_LOOPBACK",
        "PAGEFRAME_EXPOSE_DIAGNOSTICS",
        "METRICS_PORT",
    ];

    /// Helper to run config tests with isolated env vars.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.bind_addr, "0.0.0.0:8090");
            assert_eq!(config.metrics_port, 0);
            assert_eq!(config.proxy, ProxyConfig::default());
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("PAGEFRAME_BIND_ADDR", "127.0.0.1:9000"),
                ("PAGEFRAME_TIMEOUT_MS", "3000"),
                ("PAGEFRAME_MAX_REDIRECTS", "2"),
                ("PAGEFRAME_MAX_BODY_BYTES", "1048576"),
                ("PAGEFRAME_CACHE_TTL_MS", "1000"),
                ("PAGEFRAME_PAGE_CACHE_TTL_MS", "2000"),
                ("PAGEFRAME_CACHE_CAPACITY", "10"),
                ("PAGEFRAME_STREAMING_THRESHOLD_BYTES", "4096"),
                ("PAGEFRAME_ALLOW_LOOPBACK", "true"),
                ("PAGEFRAME_EXPOSE_DIAGNOSTICS", "1"),
                ("METRICS_PORT", "9091"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.bind_addr, "127.0.0.1:9000");
                assert_eq!(config.metrics_port, 9091);
                assert_eq!(config.proxy.timeout_ms, 3000);
                assert_eq!(config.proxy.max_redirects, 2);
                assert_eq!(config.proxy.max_body_bytes, 1_048_576);
                assert_eq!(config.proxy.cache_ttl_ms, 1000);
                assert_eq!(config.proxy.page_cache_ttl_ms, 2000);
                assert_eq!(config.proxy.cache_capacity, 10);
                assert_eq!(config.proxy.streaming_threshold_bytes, 4096);
                assert!(config.proxy.allow_loopback);
                assert!(config.proxy.expose_diagnostics);
            },
        );
    }

    #[test]
    fn config_empty_values_use_defaults() {
        with_env_vars(
            &[("PAGEFRAME_TIMEOUT_MS", ""), ("PAGEFRAME_ALLOW_LOOPBACK", " ")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.proxy.timeout_ms, 8000);
                assert!(!config.proxy.allow_loopback);
            },
        );
    }

    #[test]
    fn config_malformed_number_is_error() {
        with_env_vars(&[("PAGEFRAME_TIMEOUT_MS", "soon")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("PAGEFRAME_TIMEOUT_MS"));
        });
    }

    #[test]
    fn config_malformed_flag_is_error() {
        with_env_vars(&[("PAGEFRAME_ALLOW_LOOPBACK", "maybe")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("PAGEFRAME_ALLOW_LOOPBACK"));
        });
    }

    #[test]
    fn config_zero_timeout_is_error() {
        with_env_vars(&[("PAGEFRAME_TIMEOUT_MS", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_flag_spellings() {
        for (raw, expected) in [("yes", true), ("ON", true), ("false", false), ("off", false)] {
            with_env_vars(&[("PAGEFRAME_ALLOW_LOOPBACK", raw)], || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.proxy.allow_loopback, expected, "{raw}");
            });
        }
    }
}
