//! Handler dispatch and lifecycle event hooks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};
use uuid::Uuid;

use crate::profile::AstmRecord;
use crate::protocol::record::FieldValue;

/// A record as delivered to handlers: the raw positional values and, when
/// the device profile defines this record type, the typed instance.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub record_type: char,
    pub raw: Vec<FieldValue>,
    pub typed: Option<AstmRecord>,
}

/// Immutable snapshot of the connection a record arrived on.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub peer: String,
    pub device: String,
}

/// A caller-supplied callback invoked per decoded record on the server side.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &DecodedRecord, ctx: &ConnectionContext) -> anyhow::Result<()>;
}

/// Adapter so plain functions and closures work as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> RecordHandler for FnHandler<F>
where
    F: Fn(&DecodedRecord, &ConnectionContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, record: &DecodedRecord, ctx: &ConnectionContext) -> anyhow::Result<()> {
        (self.0)(record, ctx)
    }
}

/// Maps record-type letters to handlers. Unknown letters are logged and
/// dropped, which is not an error: analyzers routinely send record types a
/// host does not care about.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<char, Arc<dyn RecordHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one record-type letter.
    pub fn on(mut self, record_type: char, handler: Arc<dyn RecordHandler>) -> Self {
        self.handlers
            .insert(record_type.to_ascii_uppercase(), handler);
        self
    }

    /// Register a plain closure as the handler for one record-type letter.
    pub fn on_fn<F>(self, record_type: char, handler: F) -> Self
    where
        F: Fn(&DecodedRecord, &ConnectionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(record_type, Arc::new(FnHandler(handler)))
    }

    pub fn get(&self, record_type: char) -> Option<&Arc<dyn RecordHandler>> {
        self.handlers.get(&record_type.to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler for a record, if one is registered.
    pub async fn dispatch(
        &self,
        record: &DecodedRecord,
        ctx: &ConnectionContext,
    ) -> anyhow::Result<()> {
        match self.get(record.record_type) {
            Some(handler) => handler.handle(record, ctx).await,
            None => {
                warn!(
                    "[{}] No handler for record type '{}', dropping record",
                    ctx.peer, record.record_type
                );
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("record_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Lifecycle events emitted to observers. Payloads are snapshots; observers
/// must not block the connection that emitted them.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ConnectionEstablished {
        peer: String,
    },
    RecordProcessed {
        record: DecodedRecord,
    },
    ConnectionFailed {
        peer: String,
        reason: String,
    },
    RecordValidationFailed {
        record_type: char,
        raw: Vec<FieldValue>,
        error: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionEstablished { .. } => "connection_established",
            ServerEvent::RecordProcessed { .. } => "record_processed",
            ServerEvent::ConnectionFailed { .. } => "connection_failed",
            ServerEvent::RecordValidationFailed { .. } => "record_validation_failed",
        }
    }
}

type ObserverFn = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Observer list for lifecycle events.
///
/// Subscriptions happen during server construction; at runtime the hub is
/// only read, so connections share it behind an `Arc` without locking.
#[derive(Default, Clone)]
pub struct EventHub {
    observers: Vec<(String, ObserverFn)>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to one event name, or `"*"` for all events.
    pub fn subscribe(
        mut self,
        event_name: &str,
        observer: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> Self {
        self.observers
            .push((event_name.to_string(), Arc::new(observer)));
        self
    }

    /// Call every matching observer synchronously. A panicking observer is
    /// isolated so the others still run and the connection is unaffected.
    pub fn emit(&self, event: &ServerEvent) {
        for (name, observer) in &self.observers {
            if name != "*" && name != event.name() {
                continue;
            }
            let callback = observer.as_ref();
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("Observer for '{}' panicked, continuing", event.name());
            }
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::protocol::constants::EXTENSION_RECORD;

    fn record(letter: char) -> DecodedRecord {
        DecodedRecord {
            record_type: letter,
            raw: vec![FieldValue::Text(letter.to_string())],
            typed: None,
        }
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            connection_id: Uuid::new_v4(),
            peer: "127.0.0.1:9999".to_string(),
            device: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_registered_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let registry = HandlerRegistry::new().on_fn(
            'R',
            move |_: &DecodedRecord, _: &ConnectionContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        registry.dispatch(&record('R'), &ctx()).await.unwrap();
        registry.dispatch(&record('r'), &ctx()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhandled_extension_record_is_dropped_not_an_error() {
        let registry = HandlerRegistry::new();
        assert!(registry
            .dispatch(&record(EXTENSION_RECORD), &ctx())
            .await
            .is_ok());
    }

    #[test]
    fn test_event_hub_name_filtering() {
        let seen = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let seen_clone = Arc::clone(&seen);
        let all_clone = Arc::clone(&all);
        let hub = EventHub::new()
            .subscribe("connection_established", move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe("*", move |_| {
                all_clone.fetch_add(1, Ordering::SeqCst);
            });

        hub.emit(&ServerEvent::ConnectionEstablished {
            peer: "peer".to_string(),
        });
        hub.emit(&ServerEvent::ConnectionFailed {
            peer: "peer".to_string(),
            reason: "timeout".to_string(),
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let survived = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&survived);
        let hub = EventHub::new()
            .subscribe("*", |_| panic!("bad observer"))
            .subscribe("*", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        hub.emit(&ServerEvent::ConnectionFailed {
            peer: "peer".to_string(),
            reason: "reset".to_string(),
        });
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }
}
