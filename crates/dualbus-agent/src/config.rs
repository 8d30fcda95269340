//! Agent configuration.

use anyhow::{Context, Result};
use dualbus_adapter_amqp::AmqpSourceConfig;
use dualbus_adapter_zmq::ZmqSourceConfig;
use dualbus_core::ComparatorConfig;
use dualbus_proto::Binding;
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// AMQP ingest configuration
    pub amqp: AmqpSourceConfig,

    /// ZeroMQ ingest configuration
    pub zmq: ZmqSourceConfig,

    /// Match window and task cadences
    pub comparator: ComparatorConfig,

    /// How long ingest units may take to stop before they are aborted
    pub shutdown_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            amqp: AmqpSourceConfig::default(),
            zmq: ZmqSourceConfig::default(),
            comparator: ComparatorConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DUALBUS_AMQP_URL`: broker URL
    /// - `DUALBUS_BINDINGS`: JSON list of bindings
    /// - `DUALBUS_ZMQ_ENDPOINTS`: JSON array or comma-separated list of publisher endpoints
    /// - `DUALBUS_ZMQ_CONNECT_TIMEOUT_SECS`: longest a publisher dial may take
    /// - `DUALBUS_ZMQ_IDLE_SECS`: silence after which a publisher is dialed again
    /// - `DUALBUS_MATCH_WINDOW_SECS`: seconds before an unmatched message is reported
    /// - `DUALBUS_MATCH_INTERVAL_SECS`: match task period
    /// - `DUALBUS_SWEEP_INTERVAL_SECS`: sweep task period
    /// - `DUALBUS_RECONNECT_DELAY_SECS`: pause before reconnecting to the broker
    /// - `DUALBUS_PREFETCH`: unacknowledged deliveries per channel
    /// - `DUALBUS_SHUTDOWN_GRACE_SECS`: time allowed for ingest to stop
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("DUALBUS_AMQP_URL") {
            config.amqp.url = url;
        }

        if let Some(json) = lookup("DUALBUS_BINDINGS") {
            config.amqp.bindings =
                serde_json::from_str::<Vec<Binding>>(&json).context("Invalid DUALBUS_BINDINGS JSON")?;
        }

        if let Some(endpoints) = lookup("DUALBUS_ZMQ_ENDPOINTS") {
            config.zmq.endpoints =
                parse_endpoints(&endpoints).context("Invalid DUALBUS_ZMQ_ENDPOINTS")?;
        }

        if let Some(secs) = lookup("DUALBUS_ZMQ_CONNECT_TIMEOUT_SECS") {
            config.zmq.connect_timeout =
                parse_secs(&secs).context("Invalid DUALBUS_ZMQ_CONNECT_TIMEOUT_SECS")?;
        }

        if let Some(secs) = lookup("DUALBUS_ZMQ_IDLE_SECS") {
            config.zmq.idle_timeout = parse_secs(&secs).context("Invalid DUALBUS_ZMQ_IDLE_SECS")?;
        }

        if let Some(secs) = lookup("DUALBUS_MATCH_WINDOW_SECS") {
            config.comparator.match_window =
                parse_secs(&secs).context("Invalid DUALBUS_MATCH_WINDOW_SECS")?;
        }

        if let Some(secs) = lookup("DUALBUS_MATCH_INTERVAL_SECS") {
            config.comparator.match_interval =
                parse_secs(&secs).context("Invalid DUALBUS_MATCH_INTERVAL_SECS")?;
        }

        if let Some(secs) = lookup("DUALBUS_SWEEP_INTERVAL_SECS") {
            config.comparator.sweep_interval =
                parse_secs(&secs).context("Invalid DUALBUS_SWEEP_INTERVAL_SECS")?;
        }

        if let Some(secs) = lookup("DUALBUS_RECONNECT_DELAY_SECS") {
            config.amqp.reconnect_delay =
                parse_secs(&secs).context("Invalid DUALBUS_RECONNECT_DELAY_SECS")?;
        }

        if let Some(prefetch) = lookup("DUALBUS_PREFETCH") {
            config.amqp.prefetch = prefetch
                .trim()
                .parse()
                .context("Invalid DUALBUS_PREFETCH")?;
        }

        if let Some(secs) = lookup("DUALBUS_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace =
                parse_secs(&secs).context("Invalid DUALBUS_SHUTDOWN_GRACE_SECS")?;
        }

        Ok(config)
    }
}

fn parse_secs(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("'{value}' is not a whole number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

/// Endpoints as a JSON array or a comma-separated list.
fn parse_endpoints(value: &str) -> Result<Vec<String>> {
    let value = value.trim();
    let endpoints: Vec<String> = if value.starts_with('[') {
        serde_json::from_str(value).context("Invalid JSON array")?
    } else {
        value.split(',').map(str::to_string).collect()
    };

    Ok(endpoints
        .into_iter()
        .map(|endpoint| endpoint.trim().to_string())
        .filter(|endpoint| !endpoint.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();

        assert_eq!(config.amqp.url, "amqp://localhost:5672/%2f");
        assert_eq!(config.amqp.bindings.len(), 1);
        assert_eq!(config.amqp.bindings[0].queue, "amqp_bridge_verify_missing");
        assert_eq!(config.amqp.bindings[0].routing_keys, vec!["#".to_string()]);
        assert_eq!(config.amqp.prefetch, 10);
        assert_eq!(config.amqp.reconnect_delay, Duration::from_secs(5));
        assert!(config.zmq.endpoints.is_empty());
        assert_eq!(config.zmq.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.zmq.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.comparator.match_window, Duration::from_secs(20));
        assert_eq!(config.comparator.match_interval, Duration::from_secs(1));
        assert_eq!(config.comparator.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn overrides_from_environment() {
        let config = load(&[
            ("DUALBUS_AMQP_URL", "amqp://user:pw@rabbit:5672/verify"),
            (
                "DUALBUS_BINDINGS",
                r#"[{"exchange": "zmq.topic", "routing_keys": ["org.#"], "queue": "v"}]"#,
            ),
            ("DUALBUS_ZMQ_ENDPOINTS", "tcp://hub-a:9940, tcp://hub-b:9940"),
            ("DUALBUS_ZMQ_CONNECT_TIMEOUT_SECS", "2"),
            ("DUALBUS_ZMQ_IDLE_SECS", "120"),
            ("DUALBUS_MATCH_WINDOW_SECS", "30"),
            ("DUALBUS_MATCH_INTERVAL_SECS", "2"),
            ("DUALBUS_SWEEP_INTERVAL_SECS", "15"),
            ("DUALBUS_RECONNECT_DELAY_SECS", "1"),
            ("DUALBUS_PREFETCH", "50"),
            ("DUALBUS_SHUTDOWN_GRACE_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.amqp.url, "amqp://user:pw@rabbit:5672/verify");
        assert_eq!(config.amqp.bindings[0].exchange, "zmq.topic");
        assert_eq!(config.amqp.bindings[0].exchange_type, "topic");
        assert_eq!(
            config.zmq.endpoints,
            vec!["tcp://hub-a:9940".to_string(), "tcp://hub-b:9940".to_string()]
        );
        assert_eq!(config.zmq.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.zmq.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.comparator.match_window, Duration::from_secs(30));
        assert_eq!(config.comparator.match_interval, Duration::from_secs(2));
        assert_eq!(config.comparator.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.amqp.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.amqp.prefetch, 50);
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
    }

    #[test]
    fn endpoints_as_json_array() {
        let config = load(&[("DUALBUS_ZMQ_ENDPOINTS", r#"["tcp://a:1", "tcp://b:2"]"#)]).unwrap();
        assert_eq!(config.zmq.endpoints, vec!["tcp://a:1", "tcp://b:2"]);

        let config = load(&[("DUALBUS_ZMQ_ENDPOINTS", " , ")]).unwrap();
        assert!(config.zmq.endpoints.is_empty());
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("DUALBUS_MATCH_WINDOW_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("DUALBUS_MATCH_WINDOW_SECS"));

        let err = load(&[("DUALBUS_PREFETCH", "70000")]).unwrap_err();
        assert!(err.to_string().contains("DUALBUS_PREFETCH"));

        let err = load(&[("DUALBUS_BINDINGS", "{")]).unwrap_err();
        assert!(err.to_string().contains("DUALBUS_BINDINGS"));
    }
}
