//! Whole-system wiring: core engine, event bus, plugins, visualization.

mod common;

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use common::{mock_output, peak, scratch_dir, write_wav};
use crescendo::{
    core::{CoreEngine, CoreOptions},
    events::Event,
    registry::SERVICE_PLAYBACK_ENGINE,
};

fn options_with_mock(dir: &Path) -> (CoreOptions, common::MockHandle) {
    let (output, handle) = mock_output(48_000, 2);
    let options = CoreOptions {
        settings_path: dir.join("settings.json"),
        plugin_dir: None,
        output: Some(output),
    };
    (options, handle)
}

#[test]
fn play_file_drives_events_and_visualization() {
    let dir = scratch_dir();
    let (options, handle) = options_with_mock(dir.path());
    let mut core = CoreEngine::initialize(options).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    core.event_bus()
        .subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(event);
        }))
        .unwrap();

    let path = dir.path().join("tone.wav");
    write_wav(&path, 48_000, 2, 16, 24_000, |i| {
        (2.0 * std::f32::consts::PI * 880.0 * i as f32 / 48_000.0).sin() * 0.6
    });

    core.play_file(&path).unwrap();

    // Pull half a second of audio through the mock device.
    let mut loudest = 0.0_f32;
    for _ in 0..24 {
        loudest = loudest.max(peak(&handle.pull(1024)));
    }
    assert!(loudest > 0.5, "no audio through the core path: {loudest}");

    // The visualization tap saw the same audio.
    let vu = core.visualization().vu_meters();
    assert!(vu.peak_left > 0.3, "vu peak {}", vu.peak_left);
    let spectrum = core.visualization().spectrum();
    assert!(spectrum.magnitudes.iter().any(|&db| db > -40.0));

    core.playback().stop().unwrap();
    core.shutdown();

    let events = events.lock().unwrap().clone();
    assert!(events.contains(&Event::TrackLoaded));
    assert!(events.contains(&Event::Play));
    assert!(events.contains(&Event::Stopped));
}

#[test]
fn registry_resolves_the_playback_engine() {
    let dir = scratch_dir();
    let (options, _handle) = options_with_mock(dir.path());
    let core = CoreEngine::initialize(options).unwrap();

    let resolved = core.registry().query(SERVICE_PLAYBACK_ENGINE).unwrap();
    let engine = resolved
        .downcast_ref::<crescendo::engine::PlaybackEngine>()
        .expect("service resolves to the engine type");
    assert_eq!(engine.state(), crescendo::engine::PlaybackState::Stopped);
}

#[test]
fn unsupported_file_is_rejected() {
    let dir = scratch_dir();
    let (options, _handle) = options_with_mock(dir.path());
    let core = CoreEngine::initialize(options).unwrap();

    let path = dir.path().join("not-audio.txt");
    std::fs::write(&path, "just some text").unwrap();

    let err = core.play_file(&path).unwrap_err();
    assert_eq!(err.kind, crescendo::error::ErrorKind::NotSupported);
}
