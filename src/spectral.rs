//! Spectrogram extraction module.
//!
//! Contains the spectrogram collaborator trait used by the similarity
//! builder, as well as [`MelDesc`], the default provider computing mel
//! power spectrograms and their time deltas.

use std::f32::consts::PI;

use ndarray::{s, Array, Array1, Array2, Array3};
use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;

use crate::utils::{hz_to_mel, mel_to_hz};
use crate::AnalysisError;

/**
 * Source of spectrogram frames for beat-interval analysis.
 *
 * Implementors get handed raw sample chunks, one per beat interval, and
 * return frames shaped `(time_steps, channels, feature_bins)`. `time_steps`
 * may vary from chunk to chunk; `channels` and `feature_bins` must not.
 * The chunks come at whatever sample rate the analysed waveform carries, so
 * a provider that cares about the rate has to be built for it.
 */
pub trait SpectrogramSource {
    /// Compute the spectrogram of `chunk`.
    ///
    /// With `pad`, the chunk is zero-padded to a whole number of analysis
    /// windows before transforming; otherwise the frame count is the natural
    /// one for the chunk length.
    fn get_spectrogram(&self, chunk: &[f32], pad: bool) -> Result<Array3<f32>, AnalysisError>;
}

fn reflect_pad(array: &[f32], pad: usize) -> Vec<f32> {
    let mut prefix = array[1..=pad].iter().rev().copied().collect::<Vec<f32>>();
    let suffix = array[(array.len() - 2) - pad + 1..array.len() - 1]
        .iter()
        .rev()
        .copied()
        .collect::<Vec<f32>>();
    prefix.extend(array);
    prefix.extend(suffix);
    prefix
}

pub fn stft(signal: &[f32], window_length: usize, hop_length: usize) -> Array2<f64> {
    let mut stft = Array2::zeros((
        window_length / 2 + 1,
        (signal.len() as f32 / hop_length as f32).ceil() as usize,
    ));
    let signal = reflect_pad(signal, window_length / 2);

    // Periodic, so window_size + 1
    let mut hann_window: Array1<f32> = Array::zeros(window_length + 1);
    for n in 0..window_length {
        hann_window[[n]] = 0.5 - 0.5 * f32::cos(2. * n as f32 * PI / (window_length as f32));
    }
    let hann_window = hann_window.slice_move(s![0..window_length]);

    let mut planner = RealFftPlanner::<f32>::new();
    let r2c = planner.plan_fft_forward(window_length);
    let mut input = r2c.make_input_vec();
    let mut spectrum: Vec<Complex<f32>> = r2c.make_output_vec();

    for (window, mut stft_col) in signal
        .windows(window_length)
        .step_by(hop_length)
        .zip(stft.columns_mut())
    {
        for (slot, (sample, factor)) in input
            .iter_mut()
            .zip(window.iter().zip(hann_window.iter()))
        {
            *slot = sample * factor;
        }
        r2c.process(&mut input, &mut spectrum).unwrap();
        for (slot, x) in stft_col.iter_mut().zip(spectrum.iter()) {
            *slot = f64::from(x.norm());
        }
    }
    stft
}

// Ported from librosa's mel filter bank (librosa.filters.mel), Slaney scale,
// fmin = 0, fmax = sample_rate / 2
fn mel_filter(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let fmax = f64::from(sample_rate) / 2.;
    let fft_frequencies = Array::linspace(0., fmax, n_fft / 2 + 1);
    let band_edges = Array::linspace(hz_to_mel(0.), hz_to_mel(fmax), n_mels + 2).mapv(mel_to_hz);

    let mut weights = Array2::zeros((n_mels, n_fft / 2 + 1));
    for (idx, mut row) in weights.rows_mut().into_iter().enumerate() {
        let lower_edge = band_edges[idx];
        let center = band_edges[idx + 1];
        let upper_edge = band_edges[idx + 2];
        // Slaney normalization, constant energy per band
        let enorm = 2. / (upper_edge - lower_edge);

        for (weight, &frequency) in row.iter_mut().zip(fft_frequencies.iter()) {
            let lower = (frequency - lower_edge) / (center - lower_edge);
            let upper = (upper_edge - frequency) / (upper_edge - center);
            *weight = 0_f64.max(lower.min(upper)) * enorm;
        }
    }
    weights
}

/**
 * Mel spectrogram provider.
 *
 * The default [`SpectrogramSource`] used by the similarity builder. Every
 * frame carries two channels: channel 0 is the mel power spectrum of the
 * analysis window, channel 1 its first-order time difference, which reacts
 * to spectral change rather than spectral content.
 */
pub struct MelDesc {
    sample_rate: u32,
    mel_filter: Array2<f64>,
}

impl MelDesc {
    pub const WINDOW_SIZE: usize = 2048;
    pub const HOP_SIZE: usize = 512;

    pub fn new(sample_rate: u32, n_mels: usize) -> MelDesc {
        MelDesc {
            sample_rate,
            mel_filter: mel_filter(sample_rate, MelDesc::WINDOW_SIZE, n_mels),
        }
    }
}

impl SpectrogramSource for MelDesc {
    // TODO reuse the FFT plan across chunks instead of replanning in every call
    fn get_spectrogram(&self, chunk: &[f32], pad: bool) -> Result<Array3<f32>, AnalysisError> {
        if chunk.is_empty() {
            return Err(AnalysisError::InvalidInput(String::from(
                "tried to compute the spectrogram of an empty chunk",
            )));
        }
        if self.sample_rate == 0 {
            return Err(AnalysisError::InvalidInput(String::from(
                "tried to compute a spectrogram at a sample rate of 0 Hz",
            )));
        }

        let mut padded;
        let chunk = if chunk.len() < MelDesc::WINDOW_SIZE {
            padded = chunk.to_vec();
            padded.resize(MelDesc::WINDOW_SIZE, 0.);
            &padded[..]
        } else if pad && chunk.len() % MelDesc::WINDOW_SIZE != 0 {
            let windows = chunk.len() / MelDesc::WINDOW_SIZE + 1;
            padded = chunk.to_vec();
            padded.resize(windows * MelDesc::WINDOW_SIZE, 0.);
            &padded[..]
        } else {
            chunk
        };

        let magnitudes = stft(chunk, MelDesc::WINDOW_SIZE, MelDesc::HOP_SIZE);
        let mel = self.mel_filter.dot(&magnitudes.mapv(|x| x * x));

        let (n_mels, time_steps) = mel.dim();
        let mut frame = Array3::zeros((time_steps, 2, n_mels));
        frame
            .slice_mut(s![.., 0, ..])
            .assign(&mel.t().mapv(|x| x as f32));
        for t in 1..time_steps {
            for m in 0..n_mels {
                frame[[t, 1, m]] = frame[[t, 0, m]] - frame[[t - 1, 0, m]];
            }
        }
        Ok(frame)
    }
}
