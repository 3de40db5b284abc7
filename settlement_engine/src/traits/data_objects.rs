use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    db_types::{Container, DocRef},
    traits::StoreError,
};

/// A stored document together with its storage coordinates and version.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub container: Container,
    pub id: String,
    pub partition: String,
    /// Starts at 1 and increases by one with every successful patch.
    pub version: i64,
    pub body: Value,
}

impl Document {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.body.clone()).map_err(|e| StoreError::Serialization {
            container: self.container,
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn doc_ref(&self) -> DocRef {
        DocRef::new(self.container, self.id.as_str(), self.partition.as_str())
    }
}

/// Where a query looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Partition(String),
    CrossPartition,
}

/// A conjunction of equality tests on JSON-pointer paths into the document body.
///
/// An empty predicate matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<(String, Value)>,
}

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq<V: Into<Value>>(pointer: &str, value: V) -> Self {
        Self::all().and(pointer, value)
    }

    pub fn and<V: Into<Value>>(mut self, pointer: &str, value: V) -> Self {
        self.clauses.push((pointer.to_string(), value.into()));
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.clauses.iter().all(|(pointer, expected)| body.pointer(pointer) == Some(expected))
    }
}
