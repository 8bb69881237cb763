pub fn mean<T: Clone + Into<f32>>(input: &[T]) -> f32 {
    input.iter().map(|x| x.clone().into() as f32).sum::<f32>() / input.len() as f32
}

/// Mean squared error between two equal-length feature vectors.
///
/// Symmetric, non-negative, and exactly 0 for identical vectors.
pub fn mse(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        / a.len() as f32
}

// Slaney mel scale, like librosa's hz_to_mel / mel_to_hz with htk=False
pub fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200. / 3.;
    let min_log_hz = 1000.;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f64.ln() / 27.;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200. / 3.;
    let min_log_hz = 1000.;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f64.ln() / 27.;

    if mel >= min_log_mel {
        min_log_hz * ((mel - min_log_mel) * logstep).exp()
    } else {
        f_sp * mel
    }
}
