//! Beat tracking module.
//!
//! Contains the beat tracking collaborator trait awaited by the similarity
//! builder, as well as [`OnsetBeatTracker`], a self-contained onset-strength
//! tracker for callers that don't bring an external one.

use std::sync::Arc;

use log::{debug, info};
use ndarray::Array1;
use ndarray_stats::QuantileExt;
use noisy_float::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::utils::mean;
use crate::{AnalysisError, BeatTrack, Waveform};

const FALLBACK_BPM: f32 = 120.;

/**
 * Beat tracking collaborator.
 *
 * Awaited once by the similarity builder before any spectral work happens;
 * it is the only point of the pipeline allowed to suspend, so remote or
 * model-backed trackers fit behind it as well as local ones.
 *
 * Implementors return the beat positions as absolute sample indices into
 * the waveform, monotonically non-decreasing, together with the estimated
 * tempo in BPM.
 */
#[allow(async_fn_in_trait)]
pub trait BeatTracker {
    async fn get_beat_track(
        &self,
        waveform: &Waveform,
    ) -> Result<(BeatTrack, f32), AnalysisError>;
}

/**
 * Onset strength detection object.
 *
 * Feed it overlapping windows of a signal through [`OnsetDesc::do_`]; every
 * window contributes one onset-strength value, the sum of the positive
 * magnitude changes against the previous window (spectral flux). Beats are
 * then the envelope peaks that clear an adaptive local-mean threshold, and
 * the tempo is read off the median inter-beat interval.
 *
 * Works well on material with percussive onsets; legato-only material tends
 * to produce a sparse, unreliable envelope.
 */
pub struct OnsetDesc {
    sample_rate: u32,
    threshold_factor: f32,
    min_gap_secs: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    window: Vec<f32>,
    previous: Vec<f32>,
    envelope: Vec<f32>,
}

impl OnsetDesc {
    pub const WINDOW_SIZE: usize = 2048;
    pub const HOP_SIZE: usize = 512;

    pub fn new(sample_rate: u32, threshold_factor: f32, min_gap_secs: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(OnsetDesc::WINDOW_SIZE);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        // Periodic Hann, same shape as the spectrogram path
        let window = (0..OnsetDesc::WINDOW_SIZE)
            .map(|n| {
                0.5 - 0.5
                    * f32::cos(
                        2. * n as f32 * std::f32::consts::PI / (OnsetDesc::WINDOW_SIZE as f32),
                    )
            })
            .collect();

        OnsetDesc {
            sample_rate,
            threshold_factor,
            min_gap_secs,
            plan,
            input,
            spectrum,
            window,
            previous: vec![0.; OnsetDesc::WINDOW_SIZE / 2 + 1],
            envelope: Vec::new(),
        }
    }

    pub fn do_(&mut self, chunk: &[f32]) {
        for (n, slot) in self.input.iter_mut().enumerate() {
            *slot = if n < chunk.len() {
                chunk[n] * self.window[n]
            } else {
                0.
            };
        }
        if self
            .plan
            .process(&mut self.input, &mut self.spectrum)
            .is_err()
        {
            self.spectrum.fill(Complex::new(0., 0.));
        }

        let mut flux = 0.;
        for (previous, x) in self.previous.iter_mut().zip(self.spectrum.iter()) {
            let magnitude = x.norm();
            flux += (magnitude - *previous).max(0.);
            *previous = magnitude;
        }
        // The first window has nothing to differ from
        if self.envelope.is_empty() {
            self.envelope.push(0.);
        } else {
            self.envelope.push(flux);
        }
    }

    /**
     * Pick the beats out of the accumulated envelope.
     *
     * Returns the beat positions in absolute samples (window index times
     * [`OnsetDesc::HOP_SIZE`]) and the tempo estimate in BPM.
     */
    pub fn get_values(&mut self) -> (BeatTrack, f32) {
        let mut envelope = Array1::from(self.envelope.clone());
        let max = envelope.max().copied().unwrap_or(0.);
        if max > 0. {
            envelope /= max;
        }
        let envelope = envelope.to_vec();
        debug!("onset envelope over {} windows", envelope.len());

        let min_gap =
            usize::max(1, (self.min_gap_secs * self.sample_rate as f32 / OnsetDesc::HOP_SIZE as f32) as usize);
        let mut positions = Vec::new();
        let mut last_peak: Option<usize> = None;
        for i in 1..envelope.len().saturating_sub(1) {
            let start = i.saturating_sub(20);
            let end = usize::min(envelope.len(), i + 20);
            let threshold = mean(&envelope[start..end]) * self.threshold_factor + 0.01;

            if envelope[i] > threshold
                && envelope[i] > envelope[i - 1]
                && envelope[i] > envelope[i + 1]
                && last_peak.map_or(true, |last| i - last >= min_gap)
            {
                positions.push(i * OnsetDesc::HOP_SIZE);
                last_peak = Some(i);
            }
        }

        let tempo = estimate_tempo(&positions, self.sample_rate);
        (BeatTrack::new(positions), tempo)
    }
}

// Median inter-beat interval, clamped to a plausible 30-300 BPM range
fn estimate_tempo(positions: &[usize], sample_rate: u32) -> f32 {
    let mut intervals: Vec<f32> = positions
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f32 / sample_rate as f32)
        .filter(|&interval| interval > 0.2 && interval < 2.0)
        .collect();
    if intervals.len() < 2 {
        return FALLBACK_BPM;
    }
    intervals.sort_by_key(|&interval| n32(interval));
    60. / intervals[intervals.len() / 2]
}

/**
 * Default [`BeatTracker`], built on [`OnsetDesc`].
 *
 * `threshold_factor` scales the local-mean onset threshold; raising it keeps
 * only the strongest onsets. `min_gap_secs` debounces doubled detections of
 * one physical onset.
 */
pub struct OnsetBeatTracker {
    pub threshold_factor: f32,
    pub min_gap_secs: f32,
}

impl Default for OnsetBeatTracker {
    fn default() -> Self {
        OnsetBeatTracker {
            threshold_factor: 1.5,
            min_gap_secs: 0.1,
        }
    }
}

impl BeatTracker for OnsetBeatTracker {
    async fn get_beat_track(
        &self,
        waveform: &Waveform,
    ) -> Result<(BeatTrack, f32), AnalysisError> {
        if waveform.is_empty() {
            return Err(AnalysisError::InvalidInput(String::from(
                "tried to track beats of an empty waveform",
            )));
        }
        if waveform.sample_rate == 0 {
            return Err(AnalysisError::InvalidInput(String::from(
                "tried to track beats at a sample rate of 0 Hz",
            )));
        }

        let mut onset_desc =
            OnsetDesc::new(waveform.sample_rate, self.threshold_factor, self.min_gap_secs);
        for window in waveform
            .sample_array
            .windows(OnsetDesc::WINDOW_SIZE)
            .step_by(OnsetDesc::HOP_SIZE)
        {
            onset_desc.do_(window);
        }
        let (beat_track, tempo) = onset_desc.get_values();
        info!("tracked {} beats at {:.1} BPM", beat_track.len(), tempo);
        Ok((beat_track, tempo))
    }
}
