//! Typed key/value store shared between the control context and the tree
//!
//! Values carry a closed set of kind tags. Readers go through kind-checked
//! accessors that fail with [`BlackboardError::KindMismatch`] instead of
//! coercing.

use crate::controls::{ButtonHandle, PageHandle, ProgressHandle};
use crate::error::BlackboardError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key holding the human-readable reason of the last failure
pub const ERROR_MESSAGE_KEY: &str = "error_message";

pub type SharedBlackboard = Arc<Blackboard>;

/// Kind tag of a blackboard value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Button,
    Progress,
    Page,
    Text,
    Number,
    Payload,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Button => "button",
            ValueKind::Progress => "progress",
            ValueKind::Page => "page",
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Payload => "payload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum BlackboardValue {
    Button(ButtonHandle),
    Progress(ProgressHandle),
    Page(PageHandle),
    Text(String),
    Number(f64),
    /// Structured data such as a service response or action result
    Payload(serde_json::Value),
}

impl BlackboardValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            BlackboardValue::Button(_) => ValueKind::Button,
            BlackboardValue::Progress(_) => ValueKind::Progress,
            BlackboardValue::Page(_) => ValueKind::Page,
            BlackboardValue::Text(_) => ValueKind::Text,
            BlackboardValue::Number(_) => ValueKind::Number,
            BlackboardValue::Payload(_) => ValueKind::Payload,
        }
    }

    /// JSON view of data values. Control handles have none.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            BlackboardValue::Text(text) => Some(serde_json::Value::String(text.clone())),
            BlackboardValue::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            BlackboardValue::Payload(value) => Some(value.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Blackboard {
    entries: RwLock<HashMap<String, BlackboardValue>>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBlackboard {
        Arc::new(Self::new())
    }

    // A panic while holding the lock cannot leave a half-written map behind,
    // so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BlackboardValue>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BlackboardValue>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or overwrite an entry
    pub fn set(&self, key: impl Into<String>, value: BlackboardValue) {
        self.write().insert(key.into(), value);
    }

    pub fn set_text(&self, key: impl Into<String>, text: impl Into<String>) {
        self.set(key, BlackboardValue::Text(text.into()));
    }

    pub fn set_number(&self, key: impl Into<String>, value: f64) {
        self.set(key, BlackboardValue::Number(value));
    }

    pub fn set_payload(&self, key: impl Into<String>, value: serde_json::Value) {
        self.set(key, BlackboardValue::Payload(value));
    }

    pub fn get(&self, key: &str) -> Option<BlackboardValue> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.read().get(key).map(BlackboardValue::kind)
    }

    pub fn remove(&self, key: &str) -> Option<BlackboardValue> {
        self.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lookup(&self, key: &str) -> Result<BlackboardValue, BlackboardError> {
        self.get(key).ok_or_else(|| BlackboardError::Missing {
            key: key.to_string(),
        })
    }

    fn mismatch(key: &str, expected: ValueKind, found: &BlackboardValue) -> BlackboardError {
        BlackboardError::KindMismatch {
            key: key.to_string(),
            expected,
            found: found.kind(),
        }
    }

    pub fn button(&self, key: &str) -> Result<ButtonHandle, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Button(handle) => Ok(handle),
            other => Err(Self::mismatch(key, ValueKind::Button, &other)),
        }
    }

    pub fn progress(&self, key: &str) -> Result<ProgressHandle, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Progress(handle) => Ok(handle),
            other => Err(Self::mismatch(key, ValueKind::Progress, &other)),
        }
    }

    pub fn page(&self, key: &str) -> Result<PageHandle, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Page(handle) => Ok(handle),
            other => Err(Self::mismatch(key, ValueKind::Page, &other)),
        }
    }

    pub fn text(&self, key: &str) -> Result<String, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Text(text) => Ok(text),
            other => Err(Self::mismatch(key, ValueKind::Text, &other)),
        }
    }

    /// Text value, or `default` when the key is absent. A value of another
    /// kind is still an error.
    pub fn text_or(&self, key: &str, default: &str) -> Result<String, BlackboardError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(BlackboardValue::Text(text)) => Ok(text),
            Some(other) => Err(Self::mismatch(key, ValueKind::Text, &other)),
        }
    }

    pub fn number(&self, key: &str) -> Result<f64, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Number(n) => Ok(n),
            other => Err(Self::mismatch(key, ValueKind::Number, &other)),
        }
    }

    pub fn payload(&self, key: &str) -> Result<serde_json::Value, BlackboardError> {
        match self.lookup(key)? {
            BlackboardValue::Payload(value) => Ok(value),
            other => Err(Self::mismatch(key, ValueKind::Payload, &other)),
        }
    }

    /// Current error message, empty when none was written
    pub fn error_message(&self) -> String {
        self.text_or(ERROR_MESSAGE_KEY, "").unwrap_or_default()
    }

    pub fn set_error_message(&self, message: impl Into<String>) {
        self.set_text(ERROR_MESSAGE_KEY, message);
    }
}
