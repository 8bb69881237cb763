use beatsim::spectral::{stft, MelDesc, SpectrogramSource};
use beatsim::temporal::OnsetDesc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// One second of a 440 Hz sine at 22050 Hz.
fn sine_chunk() -> Vec<f32> {
    (0..22050)
        .map(|i| (i as f32 * 440. * 2. * std::f32::consts::PI / 22050.).sin())
        .collect()
}

/// Five seconds of clicks, two per second.
fn click_track() -> Vec<f32> {
    let mut signal = vec![0.; 5 * 22050];
    for click in 0..10 {
        let onset = click * 11025;
        for i in 0..512 {
            let t = i as f32 / 22050.;
            signal[onset + i] = (t * 1000. * 2. * std::f32::consts::PI).sin() * (-t * 60.).exp();
        }
    }
    signal
}

fn bench_stft(c: &mut Criterion) {
    let chunk = sine_chunk();

    c.bench_function("stft 1s", |b| {
        b.iter(|| stft(black_box(&chunk), 2048, 512));
    });
}

fn bench_mel_spectrogram(c: &mut Criterion) {
    let chunk = sine_chunk();
    let desc = MelDesc::new(22050, 128);

    c.bench_function("mel spectrogram 1s", |b| {
        b.iter(|| desc.get_spectrogram(black_box(&chunk), false).unwrap());
    });
}

fn bench_onset_envelope(c: &mut Criterion) {
    let signal = click_track();

    c.bench_function("onset envelope 5s", |b| {
        b.iter(|| {
            let mut desc = OnsetDesc::new(22050, 1.5, 0.1);
            for window in signal
                .windows(OnsetDesc::WINDOW_SIZE)
                .step_by(OnsetDesc::HOP_SIZE)
            {
                desc.do_(window);
            }
            desc.get_values()
        });
    });
}

criterion_group!(
    benches,
    bench_stft,
    bench_mel_spectrogram,
    bench_onset_envelope
);
criterion_main!(benches);
