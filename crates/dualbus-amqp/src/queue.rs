//! Queue declarations.

use crate::codec::FieldTable;
use crate::method::{Method, QueueDeclare};

/// A queue to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    /// Queue name (empty for server-named)
    pub name: String,
    /// Survive broker restarts
    pub durable: bool,
    /// Owned by this connection and deleted with it
    pub exclusive: bool,
    /// Delete when the last consumer goes away
    pub auto_delete: bool,
}

impl Queue {
    /// An exclusive queue, optionally deleted with its last consumer.
    ///
    /// An empty name asks the broker to pick one.
    #[must_use]
    pub fn exclusive(name: impl Into<String>, auto_delete: bool) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: true,
            auto_delete,
        }
    }

    /// Same declaration under the name the broker assigned.
    #[must_use]
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn declare_method(&self) -> Method {
        Method::QueueDeclare(QueueDeclare {
            queue: self.name.clone(),
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            no_wait: false,
            arguments: FieldTable::new(),
        })
    }
}
