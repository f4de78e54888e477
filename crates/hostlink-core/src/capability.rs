//! Named, typed accessors over host state.
//!
//! Each accessor is registered up front with a typed getter and an optional
//! setter. Commands address them by name; the table handles marshalling so
//! host code only ever sees its own Rust types.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::marshal::{HostValue, Marshal, MarshalError, ValueShape};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Unknown property: {0}")]
    Unknown(String),

    #[error("Property '{0}' is read-only")]
    ReadOnly(String),

    #[error("Property '{name}': {source}")]
    Marshal {
        name: String,
        #[source]
        source: MarshalError,
    },
}

type Getter<H> = Box<dyn Fn(&H) -> HostValue + Send + Sync>;
type Setter<H> = Box<dyn Fn(&mut H, &Value) -> Result<(), MarshalError> + Send + Sync>;

struct Capability<H> {
    shape: ValueShape,
    getter: Getter<H>,
    setter: Option<Setter<H>>,
}

/// Description of a registered property, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub shape: ValueShape,
    pub writable: bool,
}

/// Registry of host-state accessors, keyed by lowercase name.
pub struct CapabilityTable<H> {
    entries: BTreeMap<String, Capability<H>>,
}

impl<H> Default for CapabilityTable<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H: 'static> CapabilityTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a read/write property.
    pub fn register<T, G, S>(&mut self, name: &str, get: G, set: S) -> &mut Self
    where
        T: Marshal + 'static,
        G: Fn(&H) -> T + Send + Sync + 'static,
        S: Fn(&mut H, T) + Send + Sync + 'static,
    {
        let setter: Setter<H> = Box::new(move |host, raw| {
            let value = T::from_json(raw)?;
            set(host, value);
            Ok(())
        });
        self.insert::<T, G>(name, get, Some(setter))
    }

    /// Register a property that can only be read.
    pub fn register_read_only<T, G>(&mut self, name: &str, get: G) -> &mut Self
    where
        T: Marshal + 'static,
        G: Fn(&H) -> T + Send + Sync + 'static,
    {
        self.insert::<T, G>(name, get, None)
    }

    fn insert<T, G>(&mut self, name: &str, get: G, setter: Option<Setter<H>>) -> &mut Self
    where
        T: Marshal + 'static,
        G: Fn(&H) -> T + Send + Sync + 'static,
    {
        let getter: Getter<H> = Box::new(move |host| get(host).into_host());
        self.entries.insert(
            name.to_ascii_lowercase(),
            Capability {
                shape: T::SHAPE,
                getter,
                setter,
            },
        );
        self
    }

    pub fn get(&self, host: &H, name: &str) -> Result<HostValue, CapabilityError> {
        let entry = self.lookup(name)?;
        Ok((entry.getter)(host))
    }

    /// Coerce `raw` into the property's type, store it, and return the value read back.
    pub fn set(&self, host: &mut H, name: &str, raw: &Value) -> Result<HostValue, CapabilityError> {
        let entry = self.lookup(name)?;
        let setter = entry
            .setter
            .as_ref()
            .ok_or_else(|| CapabilityError::ReadOnly(name.to_string()))?;
        setter(host, raw).map_err(|source| CapabilityError::Marshal {
            name: name.to_string(),
            source,
        })?;
        Ok((entry.getter)(host))
    }

    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.entries
            .iter()
            .map(|(name, entry)| CapabilityInfo {
                name: name.clone(),
                shape: entry.shape,
                writable: entry.setter.is_some(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&Capability<H>, CapabilityError> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{Color, Vector3};
    use serde_json::json;

    #[derive(Default)]
    struct Scene {
        camera: Vector3,
        ambient: Color,
        frame: i64,
    }

    fn table() -> CapabilityTable<Scene> {
        let mut table = CapabilityTable::new();
        table
            .register("Camera.Position", |s: &Scene| s.camera, |s, v| s.camera = v)
            .register("ambient", |s: &Scene| s.ambient, |s, v| s.ambient = v)
            .register_read_only("frame", |s: &Scene| s.frame);
        table
    }

    #[test]
    fn test_get_and_set_typed() {
        let table = table();
        let mut scene = Scene::default();

        let stored = table
            .set(&mut scene, "camera.position", &json!({"x": 1, "y": 2}))
            .unwrap();
        assert_eq!(stored, HostValue::Vector3(Vector3 { x: 1.0, y: 2.0, z: 0.0 }));
        assert_eq!(scene.camera.y, 2.0);

        table.set(&mut scene, "AMBIENT", &json!({"r": 1})).unwrap();
        assert_eq!(scene.ambient.a, 1.0);
        assert_eq!(scene.ambient.r, 1.0);
    }

    #[test]
    fn test_read_only_rejected() {
        let table = table();
        let mut scene = Scene::default();
        let err = table.set(&mut scene, "frame", &json!(3)).unwrap_err();
        assert!(matches!(err, CapabilityError::ReadOnly(_)));
        assert_eq!(table.get(&scene, "frame").unwrap(), HostValue::Int(0));
    }

    #[test]
    fn test_unknown_and_bad_value() {
        let table = table();
        let mut scene = Scene::default();
        assert!(matches!(
            table.get(&scene, "nope"),
            Err(CapabilityError::Unknown(_))
        ));
        let err = table
            .set(&mut scene, "ambient", &json!("red"))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Marshal { .. }));
        assert_eq!(scene.ambient, Color::default());
    }

    #[test]
    fn test_list_is_sorted() {
        let info = table().list();
        let names: Vec<_> = info.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ambient", "camera.position", "frame"]);
        assert!(!info[2].writable);
        assert_eq!(info[1].shape, ValueShape::Vector3);
    }
}
