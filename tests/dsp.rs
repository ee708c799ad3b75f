//! DSP chain behavior over realistic program material.

mod common;

use common::{db, deinterleave, goertzel, rms};
use crescendo::{
    audio::{AudioBuffer, SampleFormat},
    dsp::{equalizer::Equalizer, volume::VolumeControl, DspChain, DspConfig, DspProcessor},
};

const RATE: u32 = 48_000;

fn config(channels: u32) -> DspConfig {
    DspConfig {
        sample_rate: RATE,
        channels,
        format: SampleFormat::Float32,
        max_buffer_frames: 65_536,
    }
}

fn buffer_from_mono(samples: &[f32], channels: u32) -> AudioBuffer {
    let mut buffer = AudioBuffer::with_capacity(samples.len(), channels, RATE);
    buffer.frames = samples.len();
    for (i, &value) in samples.iter().enumerate() {
        for ch in 0..channels as usize {
            buffer.data[i * channels as usize + ch] = value;
        }
    }
    buffer
}

/// Deterministic white noise from a linear congruential generator.
fn white_noise(frames: usize, amplitude: f32) -> Vec<f32> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    (0..frames)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let uniform = ((state >> 33) as f32) / (u32::MAX >> 1) as f32;
            (uniform - 1.0) * amplitude
        })
        .collect()
}

/// Average tone amplitude over a set of probe frequencies.
fn band_level(samples: &[f32], frequencies: &[f32]) -> f32 {
    let sum: f32 = frequencies
        .iter()
        .map(|&freq| goertzel(samples, freq, RATE as f32))
        .sum();
    sum / frequencies.len() as f32
}

#[test]
fn one_khz_boost_lifts_its_third_octave_in_noise() {
    // One second of white noise through a +12 dB boost at band 5
    // (1 kHz): the third-octave around 1 kHz must rise at least 10 dB
    // above the untouched 125 Hz region.
    let noise = white_noise(RATE as usize, 0.25);

    let mut eq = Equalizer::new();
    eq.initialize(&config(1)).unwrap();
    eq.set_param(5, 12.0).unwrap();

    let reference = buffer_from_mono(&noise, 1);
    let mut boosted = buffer_from_mono(&noise, 1);
    eq.process(&mut boosted).unwrap();

    // Probes inside the 1 kHz third-octave and around 125 Hz.
    let around_1k = [891.0, 944.0, 1_000.0, 1_059.0, 1_122.0];
    let around_125 = [111.0, 118.0, 125.0, 132.0, 140.0];

    let lift_1k = db(
        band_level(boosted.samples(), &around_1k) / band_level(reference.samples(), &around_1k),
    );
    let lift_125 = db(
        band_level(boosted.samples(), &around_125) / band_level(reference.samples(), &around_125),
    );

    assert!(
        lift_1k - lift_125 >= 10.0,
        "1 kHz lift {lift_1k:.1} dB vs 125 Hz lift {lift_125:.1} dB"
    );
    assert!((lift_1k - 12.0).abs() <= 1.5, "boost measured {lift_1k:.1} dB");
}

#[test]
fn flat_chain_passes_noise_through() {
    let noise = white_noise(8192, 0.5);

    let mut chain = DspChain::new();
    chain.push(Box::new(Equalizer::new())).unwrap();
    chain.push(Box::new(VolumeControl::new())).unwrap();
    chain.initialize(config(2)).unwrap();

    let mut buffer = buffer_from_mono(&noise, 2);
    let original = buffer.data.clone();
    chain.process(&mut buffer).unwrap();

    for (processed, original) in buffer.samples().iter().zip(&original) {
        assert!((processed - original).abs() <= 1e-6);
    }
}

#[test]
fn chain_applies_eq_then_volume() {
    let tone: Vec<f32> = (0..48_000)
        .map(|i| (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / RATE as f32).sin() * 0.25)
        .collect();

    let mut chain = DspChain::new();
    chain.push(Box::new(Equalizer::new())).unwrap();
    chain.push(Box::new(VolumeControl::new())).unwrap();
    chain.initialize(config(2)).unwrap();

    chain.stage_mut(0).unwrap().set_param(5, 12.0).unwrap();
    chain.stage_mut(1).unwrap().set_param(0, -12.0).unwrap();

    let mut buffer = buffer_from_mono(&tone, 2);
    chain.process(&mut buffer).unwrap();

    // +12 dB EQ at the tone followed by -12 dB volume nets out to about
    // unity (within the filter's settling skirt).
    let left = deinterleave(buffer.samples(), 2, 0);
    let settled = &left[4800..];
    let level = db(rms(settled) / (0.25 / 2.0_f32.sqrt()));
    assert!(level.abs() < 1.0, "net level {level:.2} dB");
}

#[test]
fn bypass_and_latency_reporting() {
    let mut chain = DspChain::new();
    chain.push(Box::new(Equalizer::new())).unwrap();
    chain.push(Box::new(VolumeControl::new())).unwrap();
    chain.initialize(config(2)).unwrap();

    chain.stage_mut(0).unwrap().set_param(5, 12.0).unwrap();
    chain.stage_mut(0).unwrap().set_bypass(true);

    let noise = white_noise(2048, 0.5);
    let mut buffer = buffer_from_mono(&noise, 2);
    let original = buffer.data.clone();
    chain.process(&mut buffer).unwrap();
    assert_eq!(buffer.data, original, "bypassed stage altered audio");

    // Latency unchanged by bypass (both stages report zero here).
    assert_eq!(chain.latency_samples(), 0);
    assert!(chain.stage(0).unwrap().is_bypassed());
}

#[test]
fn stereo_state_stays_isolated_in_the_chain() {
    // Tone left, silence right, through an aggressive EQ curve.
    let mut eq = Equalizer::new();
    eq.initialize(&config(2)).unwrap();
    for band in 0..eq.param_count() {
        eq.set_param(band, if band % 2 == 0 { 12.0 } else { -12.0 })
            .unwrap();
    }

    let mut buffer = AudioBuffer::with_capacity(8192, 2, RATE);
    buffer.frames = 8192;
    for i in 0..8192 {
        buffer.data[i * 2] =
            (2.0 * std::f32::consts::PI * 500.0 * i as f32 / RATE as f32).sin() * 0.5;
    }
    eq.process(&mut buffer).unwrap();

    let right = deinterleave(buffer.samples(), 2, 1);
    assert!(right.iter().all(|&s| s == 0.0), "cross-talk into silent channel");
}
