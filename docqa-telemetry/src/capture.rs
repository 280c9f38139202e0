use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// One captured log event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CapturedEvent {
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl CapturedEvent {
    /// String form of a field, if recorded
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Shared storage for captured events
#[derive(Debug, Clone, Default)]
pub struct SharedEventStorage {
    events: Arc<RwLock<Vec<CapturedEvent>>>,
}

impl SharedEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events at `level` whose message equals `message`
    pub fn find(&self, level: Level, message: &str) -> Vec<CapturedEvent> {
        let level = level.to_string();
        self.events().into_iter().filter(|e| e.level == level && e.message == message).collect()
    }

    pub fn clear(&self) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, event: CapturedEvent) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// A tracing layer that records events in memory
pub struct InMemoryEventLayer {
    storage: SharedEventStorage,
}

impl InMemoryEventLayer {
    pub fn new(storage: SharedEventStorage) -> Self {
        Self { storage }
    }
}

impl<S> Layer<S> for InMemoryEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let mut fields = visitor.0;
        let message = match fields.remove("message") {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let metadata = event.metadata();
        self.storage.push(CapturedEvent {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
            fields,
        });
    }
}

#[derive(Default)]
struct JsonVisitor(BTreeMap<String, serde_json::Value>);

impl Visit for JsonVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::json!(format!("{value:?}")));
    }
}
