//! Application settings.
//!
//! A sectioned key-value store persisted as JSON. Values are typed
//! (`string`, `int`, `float`, `bool`); lookups that miss return the
//! caller's default. Change listeners can be attached per `(section, key)`
//! and fire on every successful `set`. When auto-save is enabled the store
//! is written back on shutdown (and on drop).
//!
//! The file carries a `schema_version` field; files written by a newer
//! schema are refused rather than silently reinterpreted.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current settings schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A typed configuration value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// Callback fired when a watched `(section, key)` changes.
pub type ChangeListener = Box<dyn Fn(&str, &str, &Value) + Send + 'static>;

/// Section and key a listener watches.
type WatchedKey = (String, String);

#[derive(Default, Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    #[serde(flatten)]
    sections: HashMap<String, HashMap<String, Value>>,
}

struct Inner {
    document: Document,
    listeners: Vec<(WatchedKey, ChangeListener)>,
    dirty: bool,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("listener_count", &self.listeners.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Sectioned settings store with JSON persistence.
pub struct Settings {
    path: PathBuf,
    auto_save: bool,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("path", &self.path)
            .field("auto_save", &self.auto_save)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Opens the settings store backed by `path`.
    ///
    /// A missing file yields an empty store at the current schema version.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read, is not valid
    /// JSON, or was written by a newer schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let document = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let document: Document = serde_json::from_str(&contents)?;
            if document.schema_version > SCHEMA_VERSION {
                return Err(Error::not_supported(format!(
                    "settings schema {} is newer than supported {}",
                    document.schema_version, SCHEMA_VERSION
                )));
            }
            document
        } else {
            Document {
                schema_version: SCHEMA_VERSION,
                sections: HashMap::new(),
            }
        };

        Ok(Self {
            path,
            auto_save: true,
            inner: Mutex::new(Inner {
                document,
                listeners: Vec::new(),
                dirty: false,
            }),
        })
    }

    /// Enables or disables saving on shutdown/drop.
    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    /// Reads a value, if present with the requested section and key.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<Value> {
        let inner = self.inner.lock().ok()?;
        inner
            .document
            .sections
            .get(section)
            .and_then(|s| s.get(key))
            .cloned()
    }

    /// Reads a string value, falling back to `default`.
    #[must_use]
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        match self.get(section, key) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    /// Reads an integer value, falling back to `default`.
    #[must_use]
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.get(section, key) {
            Some(Value::Int(v)) => v,
            _ => default,
        }
    }

    /// Reads a float value, falling back to `default`.
    ///
    /// Integer-typed values widen to float, which JSON round-trips force
    /// anyway for whole numbers.
    #[must_use]
    pub fn get_float(&self, section: &str, key: &str, default: f64) -> f64 {
        match self.get(section, key) {
            Some(Value::Float(v)) => v,
            #[expect(clippy::cast_precision_loss)]
            Some(Value::Int(v)) => v as f64,
            _ => default,
        }
    }

    /// Reads a boolean value, falling back to `default`.
    #[must_use]
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            Some(Value::Bool(v)) => v,
            _ => default,
        }
    }

    /// Stores `value` under `(section, key)` and fires matching listeners.
    pub fn set(&self, section: &str, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner
            .document
            .sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        inner.dirty = true;

        for ((watched_section, watched_key), listener) in &inner.listeners {
            if watched_section == section && watched_key == key {
                listener(section, key, &value);
            }
        }

        Ok(())
    }

    /// Attaches a listener for changes of `(section, key)`.
    pub fn watch(&self, section: &str, key: &str, listener: ChangeListener) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner
            .listeners
            .push(((section.to_string(), key.to_string()), listener));
        Ok(())
    }

    /// Writes the store to disk if it changed since the last save.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the file write fails.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if !inner.dirty {
            return Ok(());
        }

        let contents = serde_json::to_string_pretty(&inner.document)?;
        fs::write(&self.path, contents)?;
        inner.dirty = false;

        debug!("settings saved to {}", self.path.display());
        Ok(())
    }

    /// Saves (when auto-save is enabled) and releases the store.
    pub fn shutdown(&self) {
        if self.auto_save {
            if let Err(e) = self.save() {
                error!("failed to save settings: {e}");
            }
        }
    }
}

impl Drop for Settings {
    fn drop(&mut self) {
        self.shutdown();
    }
}
