//! Broker bindings and the topology derived from them.
//!
//! Each configured [`Binding`] links one exchange to a queue with one or more
//! routing keys. Bindings sharing a queue name are grouped so the queue is
//! declared once and consumed once.

use serde::{Deserialize, Serialize};

/// Longest name AMQP allows for an exchange or queue.
const MAX_NAME_LEN: usize = 127;
/// Longest short string on the wire.
const MAX_SHORTSTR_LEN: usize = 255;

/// Routing key matching every topic on a topic exchange.
pub const WILDCARD_ROUTING_KEY: &str = "#";

/// A configured binding of a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Exchange to bind to
    pub exchange: String,
    /// Exchange type used when declaring it
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    /// Routing keys to bind with (wildcard if empty)
    #[serde(default = "default_routing_keys")]
    pub routing_keys: Vec<String>,
    /// Queue name (empty for a server-named queue)
    #[serde(default)]
    pub queue: String,
    /// Delete the queue when the verifier disconnects
    #[serde(default = "default_auto_delete")]
    pub auto_delete: bool,
}

fn default_exchange_type() -> String {
    "topic".to_string()
}

fn default_routing_keys() -> Vec<String> {
    vec![WILDCARD_ROUTING_KEY.to_string()]
}

fn default_auto_delete() -> bool {
    true
}

impl Binding {
    /// Bind every topic of `exchange` into `queue`.
    #[must_use]
    pub fn wildcard(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_type: default_exchange_type(),
            routing_keys: default_routing_keys(),
            queue: queue.into(),
            auto_delete: true,
        }
    }

    /// Routing keys to bind with, defaulting to the wildcard.
    #[must_use]
    pub fn effective_routing_keys(&self) -> Vec<&str> {
        if self.routing_keys.is_empty() {
            vec![WILDCARD_ROUTING_KEY]
        } else {
            self.routing_keys.iter().map(String::as_str).collect()
        }
    }

    /// Check names against AMQP limits.
    ///
    /// # Errors
    ///
    /// Returns error if the exchange is unnamed or any name is too long.
    pub fn validate(&self) -> Result<(), BindingError> {
        if self.exchange.is_empty() {
            return Err(BindingError::EmptyExchange);
        }
        if self.exchange.len() > MAX_NAME_LEN {
            return Err(BindingError::NameTooLong(self.exchange.clone()));
        }
        if self.queue.len() > MAX_NAME_LEN {
            return Err(BindingError::NameTooLong(self.queue.clone()));
        }
        if self.exchange_type.is_empty() {
            return Err(BindingError::EmptyExchangeType(self.exchange.clone()));
        }
        if let Some(key) = self
            .routing_keys
            .iter()
            .find(|key| key.len() > MAX_SHORTSTR_LEN)
        {
            return Err(BindingError::RoutingKeyTooLong(key.len()));
        }
        Ok(())
    }
}

/// An exchange-to-queue route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Source exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
}

/// A queue to declare with the routes bound into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePlan {
    /// Queue name (empty for server-named)
    pub queue: String,
    /// Delete the queue when the verifier disconnects
    pub auto_delete: bool,
    /// Routes to bind
    pub routes: Vec<Route>,
}

/// Exchanges and queues derived from a set of bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Exchanges to declare as `(name, type)`, in first-seen order
    pub exchanges: Vec<(String, String)>,
    /// Queues to declare, in first-seen order
    pub queues: Vec<QueuePlan>,
}

impl Topology {
    /// Validate and group bindings.
    ///
    /// # Errors
    ///
    /// Returns error if no bindings are given, a binding is invalid, an
    /// exchange is configured with two different types, or a queue is
    /// configured with conflicting auto-delete flags.
    pub fn plan(bindings: &[Binding]) -> Result<Self, BindingError> {
        if bindings.is_empty() {
            return Err(BindingError::NoBindings);
        }

        let mut exchanges: Vec<(String, String)> = Vec::new();
        let mut queues: Vec<QueuePlan> = Vec::new();

        for binding in bindings {
            binding.validate()?;

            match exchanges.iter().find(|(name, _)| *name == binding.exchange) {
                Some((_, kind)) if *kind != binding.exchange_type => {
                    return Err(BindingError::ConflictingExchangeType(
                        binding.exchange.clone(),
                    ));
                }
                Some(_) => {}
                None => exchanges.push((binding.exchange.clone(), binding.exchange_type.clone())),
            }

            let index = if let Some(index) = queues.iter().position(|q| q.queue == binding.queue)
            {
                if queues[index].auto_delete != binding.auto_delete {
                    return Err(BindingError::ConflictingQueue(binding.queue.clone()));
                }
                index
            } else {
                queues.push(QueuePlan {
                    queue: binding.queue.clone(),
                    auto_delete: binding.auto_delete,
                    routes: Vec::new(),
                });
                queues.len() - 1
            };
            let plan = &mut queues[index];

            for routing_key in binding.effective_routing_keys() {
                let route = Route {
                    exchange: binding.exchange.clone(),
                    routing_key: routing_key.to_string(),
                };
                if !plan.routes.contains(&route) {
                    plan.routes.push(route);
                }
            }
        }

        Ok(Self { exchanges, queues })
    }
}

/// Invalid binding configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// No bindings configured
    #[error("no bindings configured")]
    NoBindings,
    /// Exchange name is empty
    #[error("binding has an empty exchange name")]
    EmptyExchange,
    /// Exchange type is empty
    #[error("exchange '{0}' has an empty type")]
    EmptyExchangeType(String),
    /// Exchange or queue name exceeds 127 bytes
    #[error("name too long: {0}")]
    NameTooLong(String),
    /// Routing key exceeds 255 bytes
    #[error("routing key too long: {0} bytes")]
    RoutingKeyTooLong(usize),
    /// Same exchange configured with different types
    #[error("exchange '{0}' configured with conflicting types")]
    ConflictingExchangeType(String),
    /// Same queue configured with different auto-delete flags
    #[error("queue '{0}' configured with conflicting auto-delete flags")]
    ConflictingQueue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_defaults_from_json() {
        let binding: Binding = serde_json::from_str(r#"{"exchange": "amq.topic"}"#).unwrap();

        assert_eq!(binding.exchange_type, "topic");
        assert_eq!(binding.routing_keys, vec!["#".to_string()]);
        assert_eq!(binding.queue, "");
        assert!(binding.auto_delete);
    }

    #[test]
    fn plan_groups_by_queue() {
        let bindings = vec![
            Binding {
                routing_keys: vec!["org.a.#".into(), "org.b.#".into()],
                ..Binding::wildcard("amq.topic", "verify")
            },
            Binding::wildcard("zmq.topic", "verify"),
            Binding::wildcard("amq.topic", "other"),
        ];

        let topology = Topology::plan(&bindings).unwrap();

        assert_eq!(
            topology.exchanges,
            vec![
                ("amq.topic".to_string(), "topic".to_string()),
                ("zmq.topic".to_string(), "topic".to_string()),
            ]
        );
        assert_eq!(topology.queues.len(), 2);
        assert_eq!(topology.queues[0].queue, "verify");
        assert_eq!(topology.queues[0].routes.len(), 3);
        assert_eq!(topology.queues[1].routes[0].routing_key, "#");
    }

    #[test]
    fn empty_routing_keys_use_wildcard() {
        let binding = Binding {
            routing_keys: Vec::new(),
            ..Binding::wildcard("amq.topic", "q")
        };
        assert_eq!(binding.effective_routing_keys(), vec!["#"]);
    }

    #[test]
    fn plan_rejects_invalid_config() {
        assert_eq!(Topology::plan(&[]), Err(BindingError::NoBindings));
        assert_eq!(
            Topology::plan(&[Binding::wildcard("", "q")]),
            Err(BindingError::EmptyExchange)
        );

        let fanout = Binding {
            exchange_type: "fanout".into(),
            ..Binding::wildcard("amq.topic", "q")
        };
        assert_eq!(
            Topology::plan(&[Binding::wildcard("amq.topic", "q"), fanout]),
            Err(BindingError::ConflictingExchangeType("amq.topic".into()))
        );

        let long = Binding::wildcard("x".repeat(128), "q");
        assert!(matches!(long.validate(), Err(BindingError::NameTooLong(_))));
    }
}
