//! Exchange declarations.

use crate::codec::FieldTable;
use crate::method::{ExchangeDeclare, Method};
use std::fmt;

/// Exchange routing type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match
    Direct,
    /// Every bound queue
    Fanout,
    /// Dotted pattern match
    Topic,
    /// Header match
    Headers,
    /// Plugin-provided type
    Custom(String),
}

impl ExchangeKind {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for ExchangeKind {
    fn from(name: &str) -> Self {
        match name {
            "direct" => Self::Direct,
            "fanout" => Self::Fanout,
            "topic" => Self::Topic,
            "headers" => Self::Headers,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exchange to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Exchange name
    pub name: String,
    /// Routing type
    pub kind: ExchangeKind,
    /// Survive broker restarts
    pub durable: bool,
    /// Delete when the last binding goes away
    pub auto_delete: bool,
}

impl Exchange {
    /// A durable exchange of the given type.
    #[must_use]
    pub fn durable(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
        }
    }

    pub(crate) fn declare_method(&self) -> Method {
        Method::ExchangeDeclare(ExchangeDeclare {
            exchange: self.name.clone(),
            kind: self.kind.as_str().to_string(),
            passive: false,
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: false,
            no_wait: false,
            arguments: FieldTable::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(ExchangeKind::from("topic"), ExchangeKind::Topic);
        assert_eq!(
            ExchangeKind::from("x-delayed-message"),
            ExchangeKind::Custom("x-delayed-message".into())
        );
        assert_eq!(ExchangeKind::Fanout.to_string(), "fanout");
    }

    #[test]
    fn durable_declare() {
        let Method::ExchangeDeclare(declare) =
            Exchange::durable("zmq.topic", ExchangeKind::Topic).declare_method()
        else {
            panic!("not an exchange.declare");
        };
        assert_eq!(declare.exchange, "zmq.topic");
        assert_eq!(declare.kind, "topic");
        assert!(declare.durable);
        assert!(!declare.auto_delete);
        assert!(!declare.passive);
    }
}
