//! Per-collection document validation.
//!
//! Validation runs before any causality handling, so a rejected write never
//! touches the vector clock or produces conflict records.

use crate::document::{Document, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("document in {ns} is missing required field '{field}'")]
    MissingField { ns: Namespace, field: String },

    #[error("document in {ns} failed validation: {reason}")]
    Rejected { ns: Namespace, reason: String },
}

/// Checks a document before it is stored.
pub trait DocumentValidator: Send + Sync {
    fn validate(&self, ns: &Namespace, doc: &Document) -> Result<(), ValidationError>;
}

/// Requires a fixed set of top-level fields.
#[derive(Clone, Debug, Default)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RequiredFields {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl DocumentValidator for RequiredFields {
    fn validate(&self, ns: &Namespace, doc: &Document) -> Result<(), ValidationError> {
        match self.fields.iter().find(|f| !doc.contains_key(f.as_str())) {
            Some(field) => Err(ValidationError::MissingField {
                ns: ns.clone(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// What happens to a document that fails validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    /// Reject the write.
    #[default]
    Error,
    /// Log and accept the write.
    Warn,
}

#[derive(Clone)]
struct Registration {
    validator: Arc<dyn DocumentValidator>,
    action: ValidationAction,
}

/// Validators registered per namespace.
#[derive(Clone, Default)]
pub struct Validators {
    by_ns: HashMap<Namespace, Registration>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        ns: Namespace,
        validator: Arc<dyn DocumentValidator>,
        action: ValidationAction,
    ) {
        self.by_ns.insert(ns, Registration { validator, action });
    }

    pub fn with(
        mut self,
        ns: Namespace,
        validator: impl DocumentValidator + 'static,
        action: ValidationAction,
    ) -> Self {
        self.register(ns, Arc::new(validator), action);
        self
    }

    pub fn validate(&self, ns: &Namespace, doc: &Document) -> Result<(), ValidationError> {
        let Some(reg) = self.by_ns.get(ns) else {
            return Ok(());
        };
        match (reg.validator.validate(ns, doc), reg.action) {
            (Err(err), ValidationAction::Warn) => {
                warn!(%ns, error = %err, "document failed validation, accepting");
                Ok(())
            }
            (result, _) => result,
        }
    }
}

impl std::fmt::Debug for Validators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.by_ns.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new("mm", "orders")
    }

    #[test]
    fn test_required_fields() {
        let v = Validators::new().with(ns(), RequiredFields::new(["X"]), ValidationAction::Error);
        let ok = json!({"_id": 1, "X": 1}).as_object().cloned().unwrap();
        let bad = json!({"_id": 1}).as_object().cloned().unwrap();
        assert!(v.validate(&ns(), &ok).is_ok());
        assert_eq!(
            v.validate(&ns(), &bad),
            Err(ValidationError::MissingField {
                ns: ns(),
                field: "X".to_string()
            })
        );
        // other collections are not affected
        assert!(v.validate(&Namespace::new("mm", "other"), &bad).is_ok());
    }

    #[test]
    fn test_warn_action_accepts() {
        let v = Validators::new().with(ns(), RequiredFields::new(["X"]), ValidationAction::Warn);
        let bad = json!({"_id": 1}).as_object().cloned().unwrap();
        assert!(v.validate(&ns(), &bad).is_ok());
    }
}
