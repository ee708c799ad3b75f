//! Core engine: construction and lifecycle of the whole system.
//!
//! Wires the service registry, event bus, settings store, visualization
//! engine, playback engine and plugin host together, registers the core
//! services under their well-known ids, and tears everything down in
//! reverse order on shutdown: plugins first, then the bus, then
//! settings (which auto-save).

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    bus::EventBus,
    builtin,
    config::Settings,
    engine::PlaybackEngine,
    error::{Error, Result},
    host::PluginHost,
    output::{cpal::CpalOutput, AudioOutput},
    registry::{
        ServiceRegistry, SERVICE_CONFIG_MANAGER, SERVICE_EVENT_BUS, SERVICE_PLAYBACK_ENGINE,
        SERVICE_VISUALIZATION,
    },
    visualize::{VisualizationConfig, VisualizationEngine},
};

/// Default settings file next to the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "crescendo-settings.json";

/// Options for core construction.
pub struct CoreOptions {
    /// Settings file path.
    pub settings_path: PathBuf,
    /// Optional plugin directory to scan at startup.
    pub plugin_dir: Option<PathBuf>,
    /// Output backend; defaults to the cpal backend.
    pub output: Option<Box<dyn AudioOutput>>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(DEFAULT_SETTINGS_FILE),
            plugin_dir: None,
            output: None,
        }
    }
}

/// Owner of every core component.
pub struct CoreEngine {
    registry: Arc<ServiceRegistry>,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
    visualization: Arc<VisualizationEngine>,
    playback: Arc<PlaybackEngine>,
    host: Arc<Mutex<PluginHost>>,
    shut_down: bool,
}

impl CoreEngine {
    /// Builds and starts the core.
    ///
    /// Construction order: registry, bus, settings, visualization,
    /// playback engine, plugin host (built-ins, then the optional scan
    /// directory), plugin initialization, service registration, bus
    /// start.
    ///
    /// # Errors
    ///
    /// Returns the first component failure; partially constructed
    /// components are dropped.
    pub fn initialize(options: CoreOptions) -> Result<Self> {
        info!("initializing core engine");

        let registry = Arc::new(ServiceRegistry::new());
        let bus = Arc::new(EventBus::new());
        let settings = Arc::new(Settings::open(&options.settings_path)?);

        let visualization_config = VisualizationConfig {
            fft_size: usize::try_from(settings.get_int("visualization", "fft_size", 2048))
                .unwrap_or(2048),
            spectrum_bars: usize::try_from(settings.get_int("visualization", "spectrum_bars", 30))
                .unwrap_or(30),
            ..VisualizationConfig::default()
        };
        #[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let max_rate = settings.get_int("audio", "max_sample_rate", 192_000).max(8_000) as u32;
        let visualization = Arc::new(VisualizationEngine::new(visualization_config, max_rate)?);

        let playback = Arc::new(PlaybackEngine::new());
        playback.initialize(
            options
                .output
                .unwrap_or_else(|| Box::new(CpalOutput::new())),
        )?;
        playback.attach_event_bus(Arc::clone(&bus))?;
        playback.attach_visualization(Arc::clone(&visualization))?;

        let mut host = PluginHost::new();
        builtin::register_all(&mut host)?;
        if let Some(plugin_dir) = &options.plugin_dir {
            match host.scan_directory(plugin_dir) {
                Ok(count) => info!("loaded {count} external plugins"),
                Err(e) => warn!("plugin scan failed: {e}"),
            }
        }
        host.initialize_plugins(&registry)?;
        let host = Arc::new(Mutex::new(host));

        let bus_handle: crate::registry::ServiceHandle = Arc::downgrade(&bus) as crate::registry::ServiceHandle;
        registry.register(SERVICE_EVENT_BUS, bus_handle)?;
        let settings_handle: crate::registry::ServiceHandle = Arc::downgrade(&settings) as crate::registry::ServiceHandle;
        registry.register(SERVICE_CONFIG_MANAGER, settings_handle)?;
        let visualization_handle: crate::registry::ServiceHandle = Arc::downgrade(&visualization) as crate::registry::ServiceHandle;
        registry.register(SERVICE_VISUALIZATION, visualization_handle)?;
        let playback_handle: crate::registry::ServiceHandle = Arc::downgrade(&playback) as crate::registry::ServiceHandle;
        registry.register(SERVICE_PLAYBACK_ENGINE, playback_handle)?;

        bus.start()?;

        info!("core engine initialized");
        Ok(Self {
            registry,
            bus,
            settings,
            visualization,
            playback,
            host,
            shut_down: false,
        })
    }

    /// The service registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The event bus.
    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The settings store.
    #[must_use]
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// The visualization engine.
    #[must_use]
    pub fn visualization(&self) -> &Arc<VisualizationEngine> {
        &self.visualization
    }

    /// The playback engine.
    #[must_use]
    pub fn playback(&self) -> &Arc<PlaybackEngine> {
        &self.playback
    }

    /// The plugin host.
    #[must_use]
    pub fn plugin_host(&self) -> &Arc<Mutex<PluginHost>> {
        &self.host
    }

    /// Loads `path` with the best-matching decoder plugin and starts
    /// playback.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` when no decoder claims the file, or the
    /// engine's load/play error.
    pub fn play_file(&self, path: &Path) -> Result<()> {
        let decoder = self
            .host
            .lock()
            .map_err(|_| Error::invalid_state("plugin host poisoned"))?
            .decoder_for(path)?;

        self.playback.load_track(path, &decoder)?;
        self.playback.play()
    }

    /// Shuts the core down in reverse construction order.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        info!("shutting down core engine");

        // Plugins first: they may still reference core services.
        if let Ok(mut host) = self.host.lock() {
            host.shutdown_plugins();
        }

        self.playback.shutdown();

        if let Err(e) = self.bus.stop() {
            warn!("event bus stop failed: {e}");
        }

        // Settings save on shutdown when auto-save is enabled.
        self.settings.shutdown();

        info!("core engine shut down");
    }
}

impl Drop for CoreEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::service_id;
    use tempfile::TempDir;

    /// The directory guard outlives the core so the shutdown auto-save
    /// still has somewhere to write; it cleans up even on panic.
    fn options() -> (TempDir, CoreOptions) {
        let dir = tempfile::tempdir().expect("failed to create scratch directory");
        let options = CoreOptions {
            settings_path: dir.path().join("settings.json"),
            plugin_dir: None,
            output: None,
        };
        (dir, options)
    }

    #[test]
    fn initializes_and_registers_services() {
        let (_dir, options) = options();
        let core = CoreEngine::initialize(options).unwrap();

        assert!(core.registry().query(SERVICE_PLAYBACK_ENGINE).is_some());
        assert!(core.registry().query(SERVICE_EVENT_BUS).is_some());
        assert!(core.registry().query(SERVICE_VISUALIZATION).is_some());
        assert!(core.registry().query(SERVICE_CONFIG_MANAGER).is_some());
        assert!(core.registry().query(service_id("mp.service.nonexistent")).is_none());

        assert_eq!(core.plugin_host().lock().unwrap().len(), 5);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_dir, options) = options();
        let mut core = CoreEngine::initialize(options).unwrap();
        core.shutdown();
        core.shutdown();
        assert!(core.plugin_host().lock().unwrap().is_empty());
    }
}
