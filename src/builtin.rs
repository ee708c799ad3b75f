//! Built-in plugins.
//!
//! The bundled decoders (WAV, MP3, FLAC) and DSP stages (equalizer,
//! volume) ship as plugins registered through the same host path as
//! dynamic libraries, so the capability and lifecycle machinery is
//! exercised even without any external plugin installed.

use std::sync::Arc;

use semver::Version;
use uuid::Uuid;

use crate::{
    decoder::{flac::FlacDecoder, mp3::Mp3Decoder, wav::WavDecoder, Decoder},
    dsp::{equalizer::Equalizer, volume::VolumeControl, DspProcessor},
    error::Result,
    host::PluginHost,
    plugin::{Plugin, PluginCapabilities, PluginInfo},
    registry::ServiceRegistry,
};

/// Stable UUID of the WAV decoder plugin.
pub const WAV_PLUGIN_UUID: Uuid = Uuid::from_u128(0xb1f0_36da_0f42_4f6b_9a6e_8c1d_42aa_0001);
/// Stable UUID of the MP3 decoder plugin.
pub const MP3_PLUGIN_UUID: Uuid = Uuid::from_u128(0xb1f0_36da_0f42_4f6b_9a6e_8c1d_42aa_0002);
/// Stable UUID of the FLAC decoder plugin.
pub const FLAC_PLUGIN_UUID: Uuid = Uuid::from_u128(0xb1f0_36da_0f42_4f6b_9a6e_8c1d_42aa_0003);
/// Stable UUID of the equalizer plugin.
pub const EQUALIZER_PLUGIN_UUID: Uuid = Uuid::from_u128(0xb1f0_36da_0f42_4f6b_9a6e_8c1d_42aa_0004);
/// Stable UUID of the volume plugin.
pub const VOLUME_PLUGIN_UUID: Uuid = Uuid::from_u128(0xb1f0_36da_0f42_4f6b_9a6e_8c1d_42aa_0005);

/// Plugin wrapper around a bundled decoder.
struct DecoderPlugin {
    info: PluginInfo,
    decoder: Arc<dyn Decoder>,
}

impl DecoderPlugin {
    fn boxed(uuid: Uuid, name: &str, description: &str, decoder: Arc<dyn Decoder>) -> Box<Self> {
        Box::new(Self {
            info: PluginInfo {
                uuid,
                name: name.to_string(),
                author: "crescendo".to_string(),
                description: description.to_string(),
                version: Version::new(1, 0, 0),
                min_api_version: Version::new(0, 1, 0),
            },
            decoder,
        })
    }
}

impl Plugin for DecoderPlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::DECODER
    }

    fn initialize(&mut self, _registry: &ServiceRegistry) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn decoder(&self) -> Option<Arc<dyn Decoder>> {
        Some(Arc::clone(&self.decoder))
    }
}

/// Plugin wrapper around a bundled DSP stage factory.
struct DspPlugin {
    info: PluginInfo,
    factory: fn() -> Box<dyn DspProcessor>,
}

impl DspPlugin {
    fn boxed(
        uuid: Uuid,
        name: &str,
        description: &str,
        factory: fn() -> Box<dyn DspProcessor>,
    ) -> Box<Self> {
        Box::new(Self {
            info: PluginInfo {
                uuid,
                name: name.to_string(),
                author: "crescendo".to_string(),
                description: description.to_string(),
                version: Version::new(1, 0, 0),
                min_api_version: Version::new(0, 1, 0),
            },
            factory,
        })
    }
}

impl Plugin for DspPlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::DSP
    }

    fn initialize(&mut self, _registry: &ServiceRegistry) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn create_dsp_processor(&self) -> Option<Box<dyn DspProcessor>> {
        Some((self.factory)())
    }
}

/// Registers every built-in plugin with `host`.
///
/// # Errors
///
/// Returns the first registration failure, which only happens when a
/// built-in UUID is already taken.
pub fn register_all(host: &mut PluginHost) -> Result<()> {
    host.register_builtin(DecoderPlugin::boxed(
        WAV_PLUGIN_UUID,
        "WAV Decoder",
        "RIFF/WAVE PCM decoder (16/24/32-bit)",
        Arc::new(WavDecoder::new()),
    ))?;
    host.register_builtin(DecoderPlugin::boxed(
        MP3_PLUGIN_UUID,
        "MP3 Decoder",
        "MPEG layer III streaming decoder",
        Arc::new(Mp3Decoder::new()),
    ))?;
    host.register_builtin(DecoderPlugin::boxed(
        FLAC_PLUGIN_UUID,
        "FLAC Decoder",
        "Free Lossless Audio Codec decoder",
        Arc::new(FlacDecoder::new()),
    ))?;
    host.register_builtin(DspPlugin::boxed(
        EQUALIZER_PLUGIN_UUID,
        "10-Band Equalizer",
        "Graphic equalizer with 10 frequency bands (31 Hz - 16 kHz)",
        || Box::new(Equalizer::new()),
    ))?;
    host.register_builtin(DspPlugin::boxed(
        VOLUME_PLUGIN_UUID,
        "Volume Control",
        "dB-mapped gain stage",
        || Box::new(VolumeControl::new()),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_five_plugins_with_services() {
        let mut host = PluginHost::new();
        register_all(&mut host).unwrap();
        assert_eq!(host.len(), 5);
        assert_eq!(host.decoders().len(), 3);

        let eq = host.plugin(&EQUALIZER_PLUGIN_UUID).unwrap();
        assert!(eq.capabilities().contains(PluginCapabilities::DSP));
        assert!(eq.create_dsp_processor().is_some());
        assert!(eq.decoder().is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut host = PluginHost::new();
        register_all(&mut host).unwrap();
        let err = register_all(&mut host).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyInitialized);
    }

    #[test]
    fn decoder_lookup_by_extension() {
        let mut host = PluginHost::new();
        register_all(&mut host).unwrap();

        let decoder = host.decoder_for(std::path::Path::new("song.FLAC")).unwrap();
        assert_eq!(decoder.name(), "flac");
        let decoder = host.decoder_for(std::path::Path::new("song.wav")).unwrap();
        assert_eq!(decoder.name(), "wav");
    }
}
