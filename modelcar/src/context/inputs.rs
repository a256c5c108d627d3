//! Resolved stage inputs.

use crate::errors::StageError;
use std::collections::BTreeMap;

/// The input values bound for one stage attempt.
///
/// The executor resolves every input binding of the stage before the body
/// runs; optional bindings with no available source are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInputs {
    values: BTreeMap<String, serde_json::Value>,
}

impl StageInputs {
    /// Creates inputs from resolved values.
    #[must_use]
    pub fn new(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self { values }
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Returns an input value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    /// Returns a string input.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(serde_json::Value::as_str)
    }

    /// Returns a boolean input.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(serde_json::Value::as_bool)
    }

    /// Returns an input value or a permanent stage error naming it.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Permanent` if the input is absent.
    pub fn require(&self, name: &str) -> Result<&serde_json::Value, StageError> {
        self.values
            .get(name)
            .ok_or_else(|| StageError::permanent(format!("missing input '{name}'")))
    }

    /// Returns a string input or a permanent stage error.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Permanent` if the input is absent or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, StageError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| StageError::permanent(format!("input '{name}' is not a string")))
    }

    /// Returns true if the input is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates over bound inputs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    /// Returns the number of bound inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no inputs are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
