mod common;

use common::*;
use playback_dsp::{BandPower, SampleSource, SpectralParams, SpectralPowerStage};

fn collect(stage: &mut SpectralPowerStage<playback_dsp::MemorySource>, chunk: usize) -> Vec<f32> {
    read_to_end(stage, chunk)
}

/// Last full analysis (one event per band) from a batch of events.
fn last_analysis(events: &[BandPower], bands: usize) -> &[BandPower] {
    assert!(events.len() >= bands, "only {} events", events.len());
    &events[events.len() - bands..]
}

#[test]
fn passthrough_is_bit_identical() {
    let left = gen_noise(5, 30_000, 0.9);
    let right = gen_sine(3000.0, SR, 30_000, 0.7);
    let expected = interleave(&left, &right);
    let mut stage =
        SpectralPowerStage::new(stereo_source(&left, &right, SR), SpectralParams::default())
            .unwrap();
    let _rx = stage.subscribe(16);
    let out = collect(&mut stage, 1234);
    assert_eq!(out, expected);
}

#[test]
fn band_powers_stay_in_unit_range() {
    // Clipped square-ish signal pushes energy into every band.
    let left: Vec<f32> = gen_noise(8, 40_000, 4.0)
        .into_iter()
        .map(|x| x.clamp(-1.0, 1.0))
        .collect();
    let right: Vec<f32> = gen_sine(60.0, SR, 40_000, 1.0)
        .into_iter()
        .map(|x| x.signum())
        .collect();
    let mut stage = SpectralPowerStage::new(
        stereo_source(&left, &right, SR),
        SpectralParams::default().with_interval_ms(20.0),
    )
    .unwrap();
    let rx = stage.subscribe(10_000);
    collect(&mut stage, 4096);

    let events: Vec<BandPower> = rx.try_iter().collect();
    assert!(events.len() >= 100);
    for e in &events {
        assert!((0.0..=1.0).contains(&e.left), "{:?}", e);
        assert!((0.0..=1.0).contains(&e.right), "{:?}", e);
    }
}

#[test]
fn sine_lands_in_its_band_with_calibrated_power() {
    let left = gen_sine(1000.0, SR, 20_000, 0.5);
    let right = vec![0.0; 20_000];
    let mut stage =
        SpectralPowerStage::new(stereo_source(&left, &right, SR), SpectralParams::default())
            .unwrap();
    let rx = stage.subscribe(1000);
    collect(&mut stage, 2048);

    let events: Vec<BandPower> = rx.try_iter().collect();
    let analysis = last_analysis(&events, 10);
    let loudest = analysis
        .iter()
        .max_by(|a, b| a.left.total_cmp(&b.left))
        .unwrap();
    assert_eq!(loudest.band, 5);
    assert_eq!(loudest.frequency, 1000.0);
    // Amplitude 0.5 reads as 0.25 of full-scale sine power.
    assert!((loudest.left - 0.25).abs() < 0.02, "{}", loudest.left);
    for e in analysis {
        assert!(e.right < 1e-9);
        if e.band != 5 {
            assert!(e.left < 0.01, "band {} leaked {}", e.band, e.left);
        }
    }
}

#[test]
fn odd_length_reads_keep_channels_apart() {
    let left = gen_sine(1000.0, SR, 20_000, 0.5);
    let right = vec![0.0; 20_000];
    let source = stereo_source(&left, &right, SR).with_max_read(3);
    let mut stage = SpectralPowerStage::new(source, SpectralParams::default()).unwrap();
    let rx = stage.subscribe(1000);
    let out = collect(&mut stage, 2048);
    assert_eq!(out, interleave(&left, &right));

    let events: Vec<BandPower> = rx.try_iter().collect();
    let analysis = last_analysis(&events, 10);
    let band = &analysis[5];
    assert_eq!(band.band, 5);
    assert!((band.left - 0.25).abs() < 0.02, "{}", band.left);
    assert!(analysis.iter().all(|e| e.right < 1e-9));
}

#[test]
fn interval_controls_report_rate() {
    let n = 4096 + 441 * 10;
    let mut stage = SpectralPowerStage::new(
        stereo_source(&vec![0.1; n], &vec![0.1; n], SR),
        SpectralParams::default(),
    )
    .unwrap();
    assert_eq!(stage.fft_size(), 4096);
    stage.set_interval_ms(10.0);
    let rx = stage.subscribe(1000);
    collect(&mut stage, 882);

    // First analysis once the window fills, then one every 441 frames.
    assert_eq!(rx.try_iter().count(), 11 * 10);
}

#[test]
fn decimated_analysis_keeps_band_placement() {
    let left = gen_sine(1000.0, SR, 30_000, 0.5);
    let right = gen_sine(250.0, SR, 30_000, 0.5);
    let mut stage = SpectralPowerStage::new(
        stereo_source(&left, &right, SR),
        SpectralParams::default().with_decimation(2),
    )
    .unwrap();
    let rx = stage.subscribe(1000);
    collect(&mut stage, 4096);

    let events: Vec<BandPower> = rx.try_iter().collect();
    let analysis = last_analysis(&events, 10);
    let loudest_left = analysis
        .iter()
        .max_by(|a, b| a.left.total_cmp(&b.left))
        .unwrap();
    let loudest_right = analysis
        .iter()
        .max_by(|a, b| a.right.total_cmp(&b.right))
        .unwrap();
    assert_eq!(loudest_left.band, 5);
    assert_eq!(loudest_right.band, 3);
}

#[test]
fn custom_bands_and_reset() {
    let left = gen_sine(440.0, SR, 10_000, 0.5);
    let right = gen_sine(880.0, SR, 10_000, 0.5);
    let mut stage = SpectralPowerStage::new(
        stereo_source(&left, &right, SR),
        SpectralParams::default().with_frequencies(vec![440.0, 880.0]),
    )
    .unwrap();
    let handle = stage.handle();
    assert_eq!(handle.frequencies(), &[440.0, 880.0]);
    let rx = handle.subscribe(100);

    let mut buf = vec![0.0; 2 * 1500];
    stage.read(&mut buf);
    assert_eq!(rx.try_iter().count(), 2);

    // An emptied window needs to refill before the next report.
    handle.reset();
    let mut short = vec![0.0; 2 * 1000];
    stage.read(&mut short);
    assert_eq!(rx.try_iter().count(), 0);
    stage.read(&mut short);
    let events: Vec<BandPower> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(events[0].left > events[0].right);
    assert!(events[1].right > events[1].left);
}
