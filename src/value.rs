//! Erased instances and argument values.
//!
//! Services cross the kernel as `Arc<dyn Any + Send + Sync>`; constructor and
//! method arguments cross as [`ArgumentValue`], which also models scalar
//! literals (defaults, caller overrides), variadic sequences, and the null
//! sentinel used for nullable parameters.

use crate::error::{ErrorKind, ResolutionError, Result};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// An owned, type-erased instance under construction.
///
/// The pipeline keeps instances boxed until injection completes, then seals
/// them into an [`Instance`] before handing them to scopes and callers.
pub type BoxedInstance = Box<dyn Any + Send + Sync>;

/// Seal a boxed instance into a shared one.
#[inline]
pub fn seal(boxed: BoxedInstance) -> Instance {
    Arc::from(boxed)
}

/// One resolved argument.
#[derive(Clone)]
pub enum ArgumentValue {
    /// A resolved service instance.
    Service(Instance),
    /// A scalar literal (override or declared default).
    Scalar(serde_json::Value),
    /// A variadic sequence.
    Sequence(Vec<ArgumentValue>),
    /// The null sentinel for nullable parameters.
    Null,
}

impl ArgumentValue {
    /// Wrap a concrete value as a service instance.
    #[inline]
    pub fn service<T: Send + Sync + 'static>(value: T) -> Self {
        ArgumentValue::Service(Arc::new(value))
    }

    /// Wrap an already-shared instance.
    #[inline]
    pub fn from_instance(instance: Instance) -> Self {
        ArgumentValue::Service(instance)
    }

    /// Wrap a scalar literal.
    #[inline]
    pub fn scalar(value: impl Into<serde_json::Value>) -> Self {
        ArgumentValue::Scalar(value.into())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ArgumentValue::Null)
    }

    #[inline]
    pub fn as_service(&self) -> Option<&Instance> {
        match self {
            ArgumentValue::Service(instance) => Some(instance),
            _ => None,
        }
    }

    #[inline]
    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            ArgumentValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_sequence(&self) -> Option<&[ArgumentValue]> {
        match self {
            ArgumentValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Downcast a service value to a concrete type.
    #[inline]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.as_service()
            .and_then(|instance| Arc::clone(instance).downcast::<T>().ok())
    }

    /// Deserialize a scalar value into a concrete type.
    #[inline]
    pub fn scalar_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_scalar()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

impl fmt::Debug for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentValue::Service(_) => write!(f, "Service(<instance>)"),
            ArgumentValue::Scalar(value) => write!(f, "Scalar({value})"),
            ArgumentValue::Sequence(items) => write!(f, "Sequence(len={})", items.len()),
            ArgumentValue::Null => write!(f, "Null"),
        }
    }
}

/// An ordered, named argument vector for a constructor or method call.
#[derive(Clone, Debug, Default)]
pub struct ArgumentList {
    args: Vec<(String, ArgumentValue)>,
}

impl ArgumentList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            args: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, name: impl Into<String>, value: ArgumentValue) {
        self.args.push((name.into(), value));
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgumentValue)> {
        self.args.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Fetch a required service argument, downcast to its concrete type.
    pub fn expect_service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.get(name)
            .and_then(|value| value.downcast::<T>())
            .ok_or_else(|| {
                ResolutionError::new(
                    ErrorKind::UnresolvableParam,
                    format!("argument `{name}` missing or not a service of the expected type"),
                )
            })
    }

    /// Fetch an optional service argument; `Null` and absence both map to `None`.
    pub fn opt_service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|value| value.downcast::<T>())
    }

    /// Fetch a required scalar argument, deserialized to a concrete type.
    pub fn expect_scalar<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.get(name)
            .and_then(|value| value.scalar_as::<T>())
            .ok_or_else(|| {
                ResolutionError::new(
                    ErrorKind::UnresolvableParam,
                    format!("argument `{name}` missing or not a scalar of the expected type"),
                )
            })
    }

    /// Fetch a variadic argument as a sequence (empty when absent).
    pub fn sequence(&self, name: &str) -> Vec<ArgumentValue> {
        match self.get(name) {
            Some(ArgumentValue::Sequence(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }
}

impl FromIterator<(String, ArgumentValue)> for ArgumentList {
    fn from_iter<I: IntoIterator<Item = (String, ArgumentValue)>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Clock {
        now: u64,
    }

    #[test]
    fn test_service_downcast() {
        let value = ArgumentValue::service(Clock { now: 7 });
        let clock = value.downcast::<Clock>().unwrap();
        assert_eq!(clock.now, 7);
        assert!(value.downcast::<String>().is_none());
    }

    #[test]
    fn test_scalar_roundtrip() {
        let value = ArgumentValue::scalar(json!(42));
        assert_eq!(value.scalar_as::<i64>(), Some(42));
        assert_eq!(value.scalar_as::<String>(), None);
    }

    #[test]
    fn test_argument_list_lookup() {
        let mut args = ArgumentList::new();
        args.push("clock", ArgumentValue::service(Clock { now: 1 }));
        args.push("retries", ArgumentValue::scalar(json!(3)));

        assert_eq!(args.len(), 2);
        let clock = args.expect_service::<Clock>("clock").unwrap();
        assert_eq!(clock.now, 1);
        let retries: u32 = args.expect_scalar("retries").unwrap();
        assert_eq!(retries, 3);
        assert!(args.expect_service::<Clock>("missing").is_err());
    }

    #[test]
    fn test_variadic_sequence() {
        let mut args = ArgumentList::new();
        args.push(
            "handlers",
            ArgumentValue::Sequence(vec![
                ArgumentValue::scalar(json!("a")),
                ArgumentValue::scalar(json!("b")),
            ]),
        );

        assert_eq!(args.sequence("handlers").len(), 2);
        assert!(args.sequence("absent").is_empty());
    }
}
