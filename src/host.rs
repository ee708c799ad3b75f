//! Plugin host: discovery, loading and lifecycle.
//!
//! Lifecycle of a dynamic plugin:
//!
//! 1. `scan_directory` enumerates regular files with the platform's
//!    dynamic-library extension and tries to load each.
//! 2. `load_plugin` resolves `create_plugin`/`destroy_plugin`, creates
//!    the instance and validates its [`PluginInfo`]: the minimum API
//!    version must not exceed the host's (major has absolute precedence,
//!    then minor), and the UUID must be unique among loaded plugins.
//! 3. `initialize_plugins` runs `initialize(registry)` in load order;
//!    the first failure is returned and already-initialized plugins
//!    stay.
//! 4. `shutdown_plugins` walks **reverse** load order: `shutdown()`,
//!    `destroy_plugin`, then the library is unloaded. The host never
//!    retains pointers across an unload.
//!
//! Built-in plugins (the bundled decoders and DSPs) go through the same
//! validation and lifecycle via [`PluginHost::register_builtin`], minus
//! the library handle.

use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
};

use libloading::Library;
use uuid::Uuid;

use crate::{
    decoder::Decoder,
    error::{Error, Result},
    plugin::{
        api_version, Plugin, PluginCreateFn, PluginDestroyFn, PluginHandle, PluginInfo,
        PLUGIN_CREATE_SYMBOL, PLUGIN_DESTROY_SYMBOL,
    },
    registry::ServiceRegistry,
};

/// A loaded plugin instance, dynamic or built-in.
enum PluginInstance {
    /// Compiled into the host binary.
    Builtin(Box<dyn Plugin>),
    /// Loaded from a dynamic library.
    Dynamic {
        handle: *mut PluginHandle,
        destroy: PluginDestroyFn,
        /// Kept alive until after `destroy`; dropped last.
        _library: Library,
    },
}

// SAFETY: the raw handle is only dereferenced by the host, which is
// driven from the control thread; the plugin object itself is `Send`.
unsafe impl Send for PluginInstance {}

impl PluginInstance {
    fn plugin(&self) -> &dyn Plugin {
        match self {
            Self::Builtin(plugin) => plugin.as_ref(),
            // SAFETY: `handle` stays valid until this instance is dropped.
            Self::Dynamic { handle, .. } => unsafe { (**handle).plugin.as_ref() },
        }
    }

    fn plugin_mut(&mut self) -> &mut dyn Plugin {
        match self {
            Self::Builtin(plugin) => plugin.as_mut(),
            // SAFETY: `handle` stays valid until this instance is dropped.
            Self::Dynamic { handle, .. } => unsafe { (**handle).plugin.as_mut() },
        }
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if let Self::Dynamic {
            handle, destroy, ..
        } = self
        {
            let destroy = *destroy;
            let handle = *handle;
            // SAFETY: the handle came from this library's create_plugin
            // and is destroyed exactly once; the library unloads after.
            unsafe { destroy(handle) };
        }
    }
}

struct LoadedPlugin {
    info: PluginInfo,
    instance: PluginInstance,
    initialized: bool,
}

/// Dynamic and built-in plugin host.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<LoadedPlugin>,
    by_uuid: HashMap<Uuid, usize>,
}

impl PluginHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `directory` for dynamic libraries and loads each candidate.
    ///
    /// Individual load failures are logged and skipped; the scan itself
    /// only fails when the directory cannot be read. Returns the number
    /// of plugins loaded by this call.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` when `directory` does not exist or is not
    /// a directory.
    pub fn scan_directory(&mut self, directory: &Path) -> Result<usize> {
        if !directory.is_dir() {
            return Err(Error::file_not_found(format!(
                "plugin directory {} not found",
                directory.display()
            )));
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let is_plugin = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION));
            if !is_plugin {
                continue;
            }

            match self.load_plugin(&path) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("skipping plugin {}: {e}", path.display()),
            }
        }

        debug!("plugin scan of {} loaded {loaded} plugins", directory.display());
        Ok(loaded)
    }

    /// Loads one plugin library from `path`.
    ///
    /// # Errors
    ///
    /// * `Unknown` — the library fails to load or lacks the entry points.
    /// * `NotSupported` — the plugin requires a newer host API.
    /// * `AlreadyInitialized` — a plugin with the same UUID is loaded.
    ///
    /// # Safety rationale
    ///
    /// Loading executes the library's initializers; only trusted plugin
    /// directories should be scanned.
    pub fn load_plugin(&mut self, path: &Path) -> Result<()> {
        // SAFETY: loading and symbol resolution follow the documented
        // plugin ABI; the symbols are validated before use.
        let (library, handle, destroy) = unsafe {
            let library = Library::new(path)?;
            let create: libloading::Symbol<PluginCreateFn> =
                library.get(PLUGIN_CREATE_SYMBOL)?;
            let destroy: libloading::Symbol<PluginDestroyFn> =
                library.get(PLUGIN_DESTROY_SYMBOL)?;
            let destroy = *destroy;

            let handle = create();
            if handle.is_null() {
                return Err(Error::unknown(format!(
                    "create_plugin returned null in {}",
                    path.display()
                )));
            }
            (library, handle, destroy)
        };

        let instance = PluginInstance::Dynamic {
            handle,
            destroy,
            _library: library,
        };
        self.adopt(instance, Some(path))
    }

    /// Registers a plugin compiled into the host.
    ///
    /// Runs the same version and UUID validation as a dynamic load.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_plugin`] minus library failures.
    pub fn register_builtin(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        self.adopt(PluginInstance::Builtin(plugin), None)
    }

    /// Validates and appends a created instance.
    fn adopt(&mut self, instance: PluginInstance, path: Option<&Path>) -> Result<()> {
        let info = instance.plugin().info();
        let host_version = api_version();

        // Major has absolute precedence; minor only within equal major.
        let incompatible = info.min_api_version.major > host_version.major
            || (info.min_api_version.major == host_version.major
                && info.min_api_version.minor > host_version.minor);
        if incompatible {
            return Err(Error::not_supported(format!(
                "plugin {} requires API {}, host provides {host_version}",
                info.name, info.min_api_version
            )));
        }

        if self.by_uuid.contains_key(&info.uuid) {
            return Err(Error::already_initialized(format!(
                "plugin UUID {} already loaded",
                info.uuid
            )));
        }

        info!(
            "loaded plugin: {} v{} ({}){}",
            info.name,
            info.version,
            info.uuid,
            path.map(|p| format!(" from {}", p.display()))
                .unwrap_or_default()
        );

        self.by_uuid.insert(info.uuid, self.plugins.len());
        self.plugins.push(LoadedPlugin {
            info,
            instance,
            initialized: false,
        });
        Ok(())
    }

    /// Initializes all loaded plugins in load order.
    ///
    /// # Errors
    ///
    /// Returns the first failure; plugins initialized before it stay
    /// initialized.
    pub fn initialize_plugins(&mut self, registry: &ServiceRegistry) -> Result<()> {
        for loaded in &mut self.plugins {
            if loaded.initialized {
                continue;
            }
            loaded.instance.plugin_mut().initialize(registry)?;
            loaded.initialized = true;
            debug!("initialized plugin: {}", loaded.info.name);
        }
        Ok(())
    }

    /// Shuts down, destroys and unloads every plugin in reverse load
    /// order. Shutdown errors are logged; unload proceeds regardless.
    pub fn shutdown_plugins(&mut self) {
        while let Some(mut loaded) = self.plugins.pop() {
            if loaded.initialized {
                debug!("shutting down plugin: {}", loaded.info.name);
                loaded.instance.plugin_mut().shutdown();
            }
            // Dropping the instance destroys it and unloads the library.
            drop(loaded);
        }
        self.by_uuid.clear();
    }

    /// Number of loaded plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True when no plugin is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Info records of all loaded plugins, in load order.
    #[must_use]
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|p| p.info.clone()).collect()
    }

    /// Looks a plugin up by UUID.
    #[must_use]
    pub fn plugin(&self, uuid: &Uuid) -> Option<&dyn Plugin> {
        self.by_uuid
            .get(uuid)
            .map(|&index| self.plugins[index].instance.plugin())
    }

    /// Collects the decoder services of all decoder-capable plugins,
    /// in load order.
    #[must_use]
    pub fn decoders(&self) -> Vec<Arc<dyn Decoder>> {
        self.plugins
            .iter()
            .filter_map(|loaded| loaded.instance.plugin().decoder())
            .collect()
    }

    /// Finds a decoder for `path` by extension, falling back to header
    /// probing across all decoder plugins.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` when no decoder claims the file.
    pub fn decoder_for(&self, path: &Path) -> Result<Arc<dyn Decoder>> {
        let decoders = self.decoders();

        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            let extension = extension.to_ascii_lowercase();
            if let Some(decoder) = decoders
                .iter()
                .find(|decoder| decoder.extensions().contains(&extension.as_str()))
            {
                return Ok(Arc::clone(decoder));
            }
        }

        // Unknown extension: probe the first bytes.
        let mut header = [0_u8; 16];
        let read = std::fs::File::open(path).and_then(|mut file| {
            use std::io::Read;
            file.read(&mut header)
        })?;

        crate::decoder::probe_best(&decoders, &header[..read])
            .map(Arc::clone)
            .ok_or_else(|| {
                Error::not_supported(format!("no decoder claims {}", path.display()))
            })
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.shutdown_plugins();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginCapabilities;
    use semver::Version;
    use std::sync::{Arc, Mutex};

    struct TestPlugin {
        info: PluginInfo,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    impl TestPlugin {
        fn boxed(
            name: &str,
            uuid: Uuid,
            min_api: Version,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn Plugin> {
            Box::new(Self {
                info: PluginInfo {
                    uuid,
                    name: name.to_string(),
                    author: "tests".to_string(),
                    description: String::new(),
                    version: Version::new(1, 0, 0),
                    min_api_version: min_api,
                },
                log: Arc::clone(log),
                fail_init: false,
            })
        }
    }

    impl Plugin for TestPlugin {
        fn info(&self) -> PluginInfo {
            self.info.clone()
        }

        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities::NONE
        }

        fn initialize(&mut self, _registry: &ServiceRegistry) -> Result<()> {
            if self.fail_init {
                return Err(Error::unknown("induced failure"));
            }
            self.log.lock().unwrap().push(format!("init {}", self.info.name));
            Ok(())
        }

        fn shutdown(&mut self) {
            self.log
                .lock()
                .unwrap()
                .push(format!("shutdown {}", self.info.name));
        }
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let log = log();
        let uuid = Uuid::new_v4();
        let mut host = PluginHost::new();

        host.register_builtin(TestPlugin::boxed("a", uuid, Version::new(0, 1, 0), &log))
            .unwrap();
        let err = host
            .register_builtin(TestPlugin::boxed("b", uuid, Version::new(0, 1, 0), &log))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyInitialized);
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn newer_api_requirement_is_rejected() {
        let log = log();
        let mut host = PluginHost::new();

        let too_new = Version::new(api_version().major + 1, 0, 0);
        let err = host
            .register_builtin(TestPlugin::boxed("new", Uuid::new_v4(), too_new, &log))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotSupported);

        // Same major, newer minor is also rejected.
        let minor_newer = Version::new(api_version().major, api_version().minor + 1, 0);
        let err = host
            .register_builtin(TestPlugin::boxed("minor", Uuid::new_v4(), minor_newer, &log))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotSupported);
        assert!(host.is_empty());
    }

    #[test]
    fn shutdown_runs_in_reverse_load_order() {
        let log = log();
        let mut host = PluginHost::new();
        let registry = ServiceRegistry::new();

        for name in ["first", "second", "third"] {
            host.register_builtin(TestPlugin::boxed(
                name,
                Uuid::new_v4(),
                Version::new(0, 1, 0),
                &log,
            ))
            .unwrap();
        }
        host.initialize_plugins(&registry).unwrap();
        host.shutdown_plugins();

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "init first",
                "init second",
                "init third",
                "shutdown third",
                "shutdown second",
                "shutdown first",
            ]
        );
        assert!(host.is_empty());
    }

    #[test]
    fn first_init_failure_stops_later_plugins() {
        let log = log();
        let mut host = PluginHost::new();
        let registry = ServiceRegistry::new();

        host.register_builtin(TestPlugin::boxed(
            "ok",
            Uuid::new_v4(),
            Version::new(0, 1, 0),
            &log,
        ))
        .unwrap();

        let mut failing = TestPlugin {
            info: PluginInfo {
                uuid: Uuid::new_v4(),
                name: "failing".to_string(),
                author: String::new(),
                description: String::new(),
                version: Version::new(1, 0, 0),
                min_api_version: Version::new(0, 1, 0),
            },
            log: Arc::clone(&log),
            fail_init: false,
        };
        failing.fail_init = true;
        host.register_builtin(Box::new(failing)).unwrap();

        host.register_builtin(TestPlugin::boxed(
            "late",
            Uuid::new_v4(),
            Version::new(0, 1, 0),
            &log,
        ))
        .unwrap();

        assert!(host.initialize_plugins(&registry).is_err());
        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec!["init ok"]);
    }

    #[test]
    fn scan_of_missing_directory_fails() {
        let mut host = PluginHost::new();
        let err = host
            .scan_directory(Path::new("/nonexistent/plugin/dir"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::FileNotFound);
    }
}
