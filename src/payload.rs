//! Typed payloads carried by graphs, devices, edges and messages.
//!
//! A [`Payload`] is an owned, type-erased handle around a plain data struct.
//! Handlers downcast it to the concrete type they expect with
//! [`Payload::get`] / [`Payload::get_mut`]. Moving a `Payload` is a pointer
//! move, so the event log can swap device state in and out in O(1).
//!
//! A [`PayloadSpec`] describes one payload type: how to create a default
//! value, how to import a raw JSON value, and how to clone, compare and
//! format it. [`TypedSpec`] implements the capability for any serde struct.
//!
//! # Example
//!
//! ```
//! use gals_sim::payload::{PayloadSpec, TypedSpec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Update {
//!     t: u32,
//!     v: f64,
//! }
//!
//! let spec = TypedSpec::<Update>::new("update_message");
//! let p = spec.import(Some(&serde_json::json!({ "v": 0.5 }))).unwrap();
//! assert_eq!(p.get::<Update>().t, 0);
//! assert_eq!(spec.format(&p), "{t:0,v:0.500}");
//! ```

use dyn_clone::DynClone;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::any::{type_name, Any};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::PayloadError;

/// Object-safe view of a payload value.
pub trait PayloadData: Any + Debug + DynClone + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn eq_data(&self, other: &dyn PayloadData) -> bool;
    fn to_json(&self) -> Value;
}

dyn_clone::clone_trait_object!(PayloadData);

/// Bound satisfied by every struct usable as a payload.
pub trait PayloadValue:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Debug + Send + Sync + 'static
{
}

impl<T> PayloadValue for T where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq + Debug + Send + Sync + 'static
{
}

impl<T: PayloadValue> PayloadData for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn eq_data(&self, other: &dyn PayloadData) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |o| o == self)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Owned handle to a typed payload value.
#[derive(Clone, Debug)]
pub struct Payload(Box<dyn PayloadData>);

impl Payload {
    /// Wraps a value.
    pub fn new<T: PayloadValue>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Returns the value as `T`.
    ///
    /// # Panics
    /// Panics if the payload holds a different type. Handlers are bound to
    /// the specs of their port, so a mismatch is a wiring bug.
    pub fn get<T: 'static>(&self) -> &T {
        match self.0.as_any().downcast_ref::<T>() {
            Some(value) => value,
            None => panic!("payload {:?} is not a {}", self.0, type_name::<T>()),
        }
    }

    /// Returns the value as `&mut T`.
    ///
    /// # Panics
    /// Panics if the payload holds a different type.
    pub fn get_mut<T: 'static>(&mut self) -> &mut T {
        if !self.0.as_any().is::<T>() {
            panic!("payload {:?} is not a {}", self.0, type_name::<T>());
        }
        match self.0.as_any_mut().downcast_mut::<T>() {
            Some(value) => value,
            None => panic!("payload is not a {}", type_name::<T>()),
        }
    }

    /// Returns the value as `T` if the types match.
    pub fn try_get<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Returns true if the payload holds a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Serializes the value to JSON.
    pub fn to_json(&self) -> Value {
        self.0.to_json()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_data(other.0.as_ref())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Describes one payload type.
pub trait PayloadSpec: Debug + Send + Sync {
    /// Name of the payload type, used in errors and traces.
    fn name(&self) -> &str;

    /// Creates a payload holding the default value.
    fn create(&self) -> Payload;

    /// Imports a raw value.
    ///
    /// `None` and JSON `null` yield the default value. Fields missing from an
    /// object are default-filled; fields the type does not declare are
    /// rejected.
    fn import(&self, raw: Option<&Value>) -> Result<Payload, PayloadError>;

    /// Clones a payload.
    fn clone_payload(&self, payload: &Payload) -> Payload {
        payload.clone()
    }

    /// Compares two payloads by value.
    fn equals(&self, a: &Payload, b: &Payload) -> bool {
        a == b
    }

    /// Renders a payload as `{name:value,...}` with floats to three decimals.
    fn format(&self, payload: &Payload) -> String {
        format_value(&payload.to_json())
    }
}

/// Shared handle to a payload spec.
pub type SpecRef = Arc<dyn PayloadSpec>;

/// [`PayloadSpec`] backed by a serde struct `T`.
pub struct TypedSpec<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PayloadValue> TypedSpec<T> {
    /// Creates a spec with the given type name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Creates a shared spec.
    pub fn shared(name: impl Into<String>) -> SpecRef {
        Arc::new(Self::new(name))
    }
}

impl<T> Debug for TypedSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSpec")
            .field("name", &self.name)
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T: PayloadValue> PayloadSpec for TypedSpec<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Payload {
        Payload::new(T::default())
    }

    fn import(&self, raw: Option<&Value>) -> Result<Payload, PayloadError> {
        let fields = match raw {
            None | Some(Value::Null) => return Ok(self.create()),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(PayloadError::NotAnObject {
                    spec: self.name.clone(),
                    found: other.to_string(),
                })
            }
        };

        let invalid = |reason: String| PayloadError::Invalid {
            spec: self.name.clone(),
            reason,
        };

        let mut merged = serde_json::to_value(T::default()).map_err(|e| invalid(e.to_string()))?;
        let defaults = merged
            .as_object_mut()
            .ok_or_else(|| invalid("type does not serialize to an object".to_string()))?;
        for (key, value) in fields {
            if !defaults.contains_key(key) {
                return Err(PayloadError::UnknownField {
                    spec: self.name.clone(),
                    field: key.clone(),
                });
            }
            defaults.insert(key.clone(), value.clone());
        }

        let value: T = serde_json::from_value(merged).map_err(|e| invalid(e.to_string()))?;
        Ok(Payload::new(value))
    }
}

/// Payload type with no fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Spec for [`Empty`].
pub fn empty_spec() -> SpecRef {
    TypedSpec::<Empty>::shared("empty")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{}:{}", k, format_value(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Number(n) if n.is_f64() => format!("{:.3}", n.as_f64().unwrap_or_default()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct CellProps {
        nhood: u32,
        dt: u32,
        iv: f64,
    }

    impl Default for CellProps {
        fn default() -> Self {
            Self {
                nhood: 0,
                dt: 1,
                iv: 0.0,
            }
        }
    }

    fn spec() -> TypedSpec<CellProps> {
        TypedSpec::new("cell_properties")
    }

    #[test]
    fn test_create_default() {
        let p = spec().create();
        assert_eq!(p.get::<CellProps>(), &CellProps::default());
    }

    #[test]
    fn test_import_default_fills_missing() {
        let p = spec().import(Some(&json!({ "nhood": 4 }))).unwrap();
        let props = p.get::<CellProps>();
        assert_eq!(props.nhood, 4);
        assert_eq!(props.dt, 1);
        assert_eq!(props.iv, 0.0);
    }

    #[test]
    fn test_import_none_and_null() {
        assert_eq!(spec().import(None).unwrap(), spec().create());
        assert_eq!(spec().import(Some(&Value::Null)).unwrap(), spec().create());
    }

    #[test]
    fn test_import_rejects_unknown_field() {
        let err = spec().import(Some(&json!({ "nhood": 4, "west": 1 }))).unwrap_err();
        assert_eq!(
            err,
            PayloadError::UnknownField {
                spec: "cell_properties".to_string(),
                field: "west".to_string(),
            }
        );
    }

    #[test]
    fn test_import_rejects_non_object() {
        let err = spec().import(Some(&json!([1, 2]))).unwrap_err();
        assert!(matches!(err, PayloadError::NotAnObject { .. }));
    }

    #[test]
    fn test_import_rejects_bad_type() {
        let err = spec().import(Some(&json!({ "nhood": "four" }))).unwrap_err();
        assert!(matches!(err, PayloadError::Invalid { .. }));
    }

    #[test]
    fn test_equals_and_clone() {
        let s = spec();
        let a = s.import(Some(&json!({ "iv": 0.25 }))).unwrap();
        let b = s.clone_payload(&a);
        assert!(s.equals(&a, &b));

        let c = s.create();
        assert!(!s.equals(&a, &c));
        assert_ne!(a, Payload::new(Empty {}));
    }

    #[test]
    fn test_get_mut() {
        let mut p = spec().create();
        p.get_mut::<CellProps>().nhood = 7;
        assert_eq!(p.get::<CellProps>().nhood, 7);
        assert!(p.try_get::<Empty>().is_none());
        assert!(p.is::<CellProps>());
    }

    #[test]
    #[should_panic(expected = "is not a")]
    fn test_get_wrong_type_panics() {
        let p = spec().create();
        let _ = p.get::<Empty>();
    }

    #[test]
    fn test_format() {
        let p = spec().import(Some(&json!({ "nhood": 4, "iv": 0.5 }))).unwrap();
        assert_eq!(spec().format(&p), "{dt:1,iv:0.500,nhood:4}");
    }

    #[test]
    fn test_empty_spec() {
        let s = empty_spec();
        assert_eq!(s.name(), "empty");
        assert_eq!(s.format(&s.create()), "{}");
        assert!(s.import(Some(&json!({}))).is_ok());
        assert!(s.import(Some(&json!({ "w": 1.0 }))).is_err());
    }

    #[test]
    fn test_serialize() {
        let p = spec().create();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, json!({ "nhood": 0, "dt": 1, "iv": 0.0 }));
    }
}
