//! Plugin contract and ABI.
//!
//! A plugin is a dynamic library exporting two C-linkage symbols:
//!
//! * `create_plugin() -> *mut PluginHandle`
//! * `destroy_plugin(*mut PluginHandle)`
//!
//! [`PluginHandle`] wraps the boxed trait object so only a thin pointer
//! crosses the ABI boundary. Host and plugin must be built with the same
//! toolchain; the handle is otherwise opaque to the loader. The
//! [`declare_plugin!`](crate::declare_plugin) macro emits both symbols
//! for a plugin crate.
//!
//! Plugins must not panic across the ABI boundary; entry points are
//! expected to catch faults and return errors instead.

use std::{any::Any, sync::Arc};

use semver::Version;
use uuid::Uuid;

use crate::{
    decoder::Decoder, dsp::DspProcessor, error::Result, registry::ServiceId,
    registry::ServiceRegistry,
};

/// The plugin API version implemented by this host.
///
/// Plugins whose `min_api_version` exceeds it (major first, then minor)
/// are rejected at load.
#[must_use]
pub fn api_version() -> Version {
    Version::new(0, 4, 0)
}

/// Identity and versioning of a plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    /// Globally unique identifier; duplicates are rejected at load.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Author string.
    pub author: String,
    /// One-line description.
    pub description: String,
    /// Plugin version.
    pub version: Version,
    /// Minimum host API version the plugin needs.
    pub min_api_version: Version,
}

/// Capability flags a plugin can advertise.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PluginCapabilities(u32);

impl PluginCapabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// Audio format decoder.
    pub const DECODER: Self = Self(1 << 0);
    /// Audio format encoder.
    pub const ENCODER: Self = Self(1 << 1);
    /// DSP processor.
    pub const DSP: Self = Self(1 << 2);
    /// Audio visualizer.
    pub const VISUALIZER: Self = Self(1 << 3);
    /// UI component.
    pub const UI_COMPONENT: Self = Self(1 << 4);
    /// Media library manager.
    pub const LIBRARY_MANAGER: Self = Self(1 << 5);
    /// Playlist format handler.
    pub const PLAYLIST_HANDLER: Self = Self(1 << 6);
    /// Audio output device.
    pub const OUTPUT: Self = Self(1 << 7);
    /// Audio input device.
    pub const INPUT: Self = Self(1 << 8);

    /// True when every capability in `other` is present.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PluginCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Declared dependency on another plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginDependency {
    /// UUID of the required plugin.
    pub uuid: Uuid,
    /// Minimum required version.
    pub min_version: Version,
}

/// The interface every plugin implements.
pub trait Plugin: Send {
    /// Identity and versioning.
    fn info(&self) -> PluginInfo;

    /// Advertised capabilities.
    fn capabilities(&self) -> PluginCapabilities;

    /// Plugins this plugin requires; empty by default.
    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// Called once after load, in load order, with the service registry.
    ///
    /// # Errors
    ///
    /// A failure aborts initialization of later plugins; already
    /// initialized plugins stay initialized.
    fn initialize(&mut self, registry: &ServiceRegistry) -> Result<()>;

    /// Called in reverse load order before unload.
    ///
    /// Must complete within 5 seconds; the host proceeds to unload after
    /// that deadline.
    fn shutdown(&mut self);

    /// The decoder service, for plugins with [`PluginCapabilities::DECODER`].
    fn decoder(&self) -> Option<Arc<dyn Decoder>> {
        None
    }

    /// Creates a DSP stage, for plugins with [`PluginCapabilities::DSP`].
    fn create_dsp_processor(&self) -> Option<Box<dyn DspProcessor>> {
        None
    }

    /// Type-erased service lookup for everything else.
    fn get_service(&self, _id: ServiceId) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Thin-pointer wrapper passed across the C ABI.
pub struct PluginHandle {
    /// The plugin instance.
    pub plugin: Box<dyn Plugin>,
}

/// `create_plugin` symbol signature.
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut PluginHandle;

/// `destroy_plugin` symbol signature.
pub type PluginDestroyFn = unsafe extern "C" fn(*mut PluginHandle);

/// Name of the create symbol.
pub const PLUGIN_CREATE_SYMBOL: &[u8] = b"create_plugin\0";

/// Name of the destroy symbol.
pub const PLUGIN_DESTROY_SYMBOL: &[u8] = b"destroy_plugin\0";

/// Emits the `create_plugin` / `destroy_plugin` exports for a plugin
/// crate built as a `cdylib`.
///
/// # Example
///
/// ```ignore
/// crescendo::declare_plugin!(MyDecoderPlugin, MyDecoderPlugin::new());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($ty:ty, $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn create_plugin() -> *mut $crate::plugin::PluginHandle {
            Box::into_raw(Box::new($crate::plugin::PluginHandle {
                plugin: Box::new($ctor),
            }))
        }

        /// # Safety
        ///
        /// `handle` must be a pointer returned by `create_plugin` that
        /// has not been destroyed yet.
        #[no_mangle]
        pub unsafe extern "C" fn destroy_plugin(handle: *mut $crate::plugin::PluginHandle) {
            if !handle.is_null() {
                drop(Box::from_raw(handle));
            }
        }
    };
}
