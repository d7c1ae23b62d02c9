//! The sandboxed frame's global object, as far as the shims are concerned.
//!
//! Shims install their emulated APIs here as properties. A property that
//! is not `writable` cannot be replaced by content scripts through
//! [`ContentWindow::assign`]; a `configurable` property can be redefined by
//! a shim, which is what makes repeated initialization idempotent.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

pub type GlobalValue = Arc<dyn Any + Send + Sync>;

/// Names of the globals shims install.
pub mod globals {
    pub const LOCAL_STORAGE: &str = "localStorage";
    pub const SESSION_STORAGE: &str = "sessionStorage";
    /// Stands in for `document.cookie`
    pub const COOKIE: &str = "document.cookie";
    /// SCORM 1.2 runtime
    pub const SCORM_API: &str = "API";
    pub const XAPI: &str = "xAPI";
    pub const KOLIBRI: &str = "kolibri";
    pub const H5P: &str = "H5P";
    pub const H5P_INTEGRATION: &str = "H5PIntegration";
    pub const BLOOM: &str = "bloom";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags {
    pub writable: bool,
    pub configurable: bool,
}

impl PropertyFlags {
    /// Locked against content, redefinable by shims.
    pub const SHIM: PropertyFlags = PropertyFlags {
        writable: false,
        configurable: true,
    };
    /// What a plain assignment creates.
    pub const PLAIN: PropertyFlags = PropertyFlags {
        writable: true,
        configurable: true,
    };
}

struct Property {
    value: GlobalValue,
    flags: PropertyFlags,
}

#[derive(Default)]
pub struct ContentWindow {
    properties: RwLock<BTreeMap<String, Property>>,
}

impl ContentWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a property. Fails only when an existing property
    /// is not configurable.
    pub fn define_property(&self, name: &str, value: GlobalValue, flags: PropertyFlags) -> bool {
        let mut properties = self.properties.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = properties.get(name) {
            if !existing.flags.configurable {
                warn!(name, "Cannot redefine non-configurable property");
                return false;
            }
        }
        properties.insert(name.to_string(), Property { value, flags });
        debug!(name, "Defined window property");
        true
    }

    /// Install a shim global.
    pub fn install<T: Any + Send + Sync>(&self, name: &str, value: Arc<T>) -> bool {
        self.define_property(name, value, PropertyFlags::SHIM)
    }

    /// Assignment as content scripts do it: silently ignored for
    /// non-writable properties.
    pub fn assign(&self, name: &str, value: GlobalValue) -> bool {
        let mut properties = self.properties.write().unwrap_or_else(|e| e.into_inner());
        match properties.get_mut(name) {
            Some(existing) if !existing.flags.writable => false,
            Some(existing) => {
                existing.value = value;
                true
            }
            None => {
                properties.insert(
                    name.to_string(),
                    Property {
                        value,
                        flags: PropertyFlags::PLAIN,
                    },
                );
                true
            }
        }
    }

    /// Typed lookup of a global.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let properties = self.properties.read().unwrap_or_else(|e| e.into_inner());
        properties
            .get(name)
            .and_then(|p| p.value.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        let properties = self.properties.read().unwrap_or_else(|e| e.into_inner());
        properties.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let properties = self.properties.read().unwrap_or_else(|e| e.into_inner());
        properties.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_globals_resist_content() {
        let window = ContentWindow::new();
        assert!(window.install("API", Arc::new(1u32)));
        assert!(!window.assign("API", Arc::new("hijacked")));
        assert_eq!(window.get::<u32>("API").as_deref(), Some(&1));
    }

    #[test]
    fn test_reinstall_is_idempotent() {
        let window = ContentWindow::new();
        assert!(window.install("xAPI", Arc::new(1u32)));
        assert!(window.install("xAPI", Arc::new(2u32)));
        assert_eq!(window.get::<u32>("xAPI").as_deref(), Some(&2));
        assert_eq!(window.names(), vec!["xAPI"]);
    }

    #[test]
    fn test_locked_property() {
        let window = ContentWindow::new();
        let locked = PropertyFlags {
            writable: false,
            configurable: false,
        };
        assert!(window.define_property("H5P", Arc::new(1u32), locked));
        assert!(!window.install("H5P", Arc::new(2u32)));
        assert!(window.get::<String>("H5P").is_none());
    }
}
