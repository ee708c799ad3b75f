//! Service registry keyed by hashed service names.
//!
//! Core components and plugins advertise themselves under a [`ServiceId`],
//! the FNV-1a 64-bit hash of a dotted name such as
//! `mp.service.playback_engine`. The hash is the on-wire identifier, so
//! plugins built elsewhere resolve the same ids the host computes at
//! compile time.
//!
//! The registry stores *non-owning* handles ([`Weak`]): components own
//! themselves (or are owned by their plugin), and a handle that outlives
//! its service simply stops resolving. This breaks the reference cycle
//! between the engine and the registry.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::error::{Error, Result};

/// Identifier of a registered service: FNV-1a 64 of its dotted name.
pub type ServiceId = u64;

/// FNV-1a 64-bit offset basis.
const FNV_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hashes a dotted service name to its [`ServiceId`].
///
/// FNV-1a over the UTF-8 bytes; deterministic across runs and platforms.
#[must_use]
pub const fn service_id(name: &str) -> ServiceId {
    let bytes = name.as_bytes();
    let mut hash = FNV_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// The plugin host service.
pub const SERVICE_PLUGIN_HOST: ServiceId = service_id("mp.service.plugin_host");
/// The event bus service.
pub const SERVICE_EVENT_BUS: ServiceId = service_id("mp.service.event_bus");
/// The configuration manager service.
pub const SERVICE_CONFIG_MANAGER: ServiceId = service_id("mp.service.config_manager");
/// The playback engine service.
pub const SERVICE_PLAYBACK_ENGINE: ServiceId = service_id("mp.service.playback_engine");
/// The visualization engine service.
pub const SERVICE_VISUALIZATION: ServiceId = service_id("mp.service.visualization");
/// The audio output service.
pub const SERVICE_AUDIO_OUTPUT: ServiceId = service_id("mp.service.audio_output");
/// The decoder service exposed by decoder plugins.
pub const SERVICE_DECODER: ServiceId = service_id("mp.decoder");

/// A type-erased, non-owning service handle.
pub type ServiceHandle = Weak<dyn Any + Send + Sync>;

/// Mapping of [`ServiceId`] to service handle with insertion uniqueness.
///
/// All operations lock a single internal mutex; the registry is never
/// touched from the audio callback.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<ServiceId, ServiceHandle>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `id`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if `id` is already registered, even if
    /// the previous service has since been dropped; stale entries must be
    /// unregistered explicitly.
    pub fn register(&self, id: ServiceId, service: ServiceHandle) -> Result<()> {
        let mut services = self.services.lock()?;
        if services.contains_key(&id) {
            return Err(Error::already_initialized(format!(
                "service {id:#018x} is already registered"
            )));
        }
        services.insert(id, service);
        Ok(())
    }

    /// Removes the registration for `id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `id` is not registered.
    pub fn unregister(&self, id: ServiceId) -> Result<()> {
        let mut services = self.services.lock()?;
        if services.remove(&id).is_none() {
            return Err(Error::invalid_parameter(format!(
                "service {id:#018x} is not registered"
            )));
        }
        Ok(())
    }

    /// Resolves `id` to a live service handle.
    ///
    /// Returns `None` when the id is unknown or the service has been
    /// dropped since registration.
    #[must_use]
    pub fn query(&self, id: ServiceId) -> Option<Arc<dyn Any + Send + Sync>> {
        let services = self.services.lock().ok()?;
        services.get(&id).and_then(Weak::upgrade)
    }

    /// Number of registered ids, live or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
