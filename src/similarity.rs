//! Self-similarity analysis module.
//!
//! The heart of the crate: await the beat tracking collaborator, average a
//! spectrogram over every beat interval, and compare the per-beat feature
//! vectors pairwise with the mean squared error.

use log::debug;
use ndarray::{Array2, Axis};

use crate::spectral::{MelDesc, SpectrogramSource};
use crate::temporal::{BeatTracker, OnsetBeatTracker};
use crate::utils::mse;
use crate::{AnalysisError, BeatTrack, Waveform};

// Mel bands of the default spectrogram provider
const N_MELS: usize = 128;

/// Options of the similarity builder.
///
/// `channel` picks the spectrogram channel the distances are computed on.
/// With the default provider, channel 0 is mel power and channel 1 its time
/// delta; the default compares deltas, so beats are "close" when their
/// spectral movement matches, not their raw spectral content.
#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    pub channel: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        SimilarityConfig { channel: 1 }
    }
}

/**
 * Result of a similarity analysis.
 *
 * `matrix` is `(beats, beats)` and half-filled: column `i` starts with `i`
 * zeros, so the computed distances sit on and below the main diagonal and
 * the strict upper triangle is padding, not similarity values. `matrix[(j,
 * i)]` for `j >= i` is the mean squared error between the feature vectors of
 * beats `i` and `j`; the diagonal is exactly zero.
 */
#[derive(Debug, Clone)]
pub struct SelfSimilarity {
    pub matrix: Array2<f32>,
    pub beat_track: BeatTrack,
    pub tempo: f32,
}

/**
 * Similarity matrix builder over a pair of collaborators.
 *
 * The beat tracker is awaited once, before any spectral work; everything
 * after that first answer runs sequentially on the calling task. Errors
 * from either collaborator abort the build, there is no partial matrix.
 */
pub struct SimilarityBuilder<B, S> {
    beat_tracker: B,
    spectrogram_source: S,
    config: SimilarityConfig,
}

impl<B: BeatTracker, S: SpectrogramSource> SimilarityBuilder<B, S> {
    pub fn new(beat_tracker: B, spectrogram_source: S) -> Self {
        SimilarityBuilder {
            beat_tracker,
            spectrogram_source,
            config: SimilarityConfig::default(),
        }
    }

    pub fn with_config(beat_tracker: B, spectrogram_source: S, config: SimilarityConfig) -> Self {
        SimilarityBuilder {
            beat_tracker,
            spectrogram_source,
            config,
        }
    }

    pub async fn build(&self, waveform: &Waveform) -> Result<SelfSimilarity, AnalysisError> {
        let (beat_track, tempo) = self.beat_tracker.get_beat_track(waveform).await?;

        let beat_samples = self.beat_samples(waveform, &beat_track)?;
        let matrix = distance_matrix(&beat_samples)?;
        debug!("built {0}x{0} similarity matrix", beat_track.len());
        Ok(SelfSimilarity {
            matrix,
            beat_track,
            tempo,
        })
    }

    // One feature vector per beat: the spectrogram of the interval leading
    // up to the beat, averaged over time, on the configured channel
    fn beat_samples(
        &self,
        waveform: &Waveform,
        beat_track: &BeatTrack,
    ) -> Result<Vec<Vec<f32>>, AnalysisError> {
        let mut beat_samples = Vec::with_capacity(beat_track.len());
        for (start, end) in beat_track.intervals() {
            if end < start || end > waveform.len() {
                return Err(AnalysisError::InvalidInput(format!(
                    "beat interval {}..{} outside a waveform of {} samples",
                    start,
                    end,
                    waveform.len(),
                )));
            }
            let frame = self
                .spectrogram_source
                .get_spectrogram(&waveform.sample_array[start..end], false)?;
            let averaged = frame.mean_axis(Axis(0)).ok_or_else(|| {
                AnalysisError::Spectrogram(String::from(
                    "got a spectrogram frame with no time steps",
                ))
            })?;
            if self.config.channel >= averaged.dim().0 {
                return Err(AnalysisError::InvalidInput(format!(
                    "channel {} out of range for a {}-channel spectrogram",
                    self.config.channel,
                    averaged.dim().0,
                )));
            }
            beat_samples.push(averaged.index_axis(Axis(0), self.config.channel).to_vec());
        }
        Ok(beat_samples)
    }
}

// Column i: i leading zeros, then the distances from beat i to every beat
// from i on. Computed values land on and below the diagonal; the strict
// upper triangle stays zero
fn distance_matrix(beat_samples: &[Vec<f32>]) -> Result<Array2<f32>, AnalysisError> {
    if let Some(first) = beat_samples.first() {
        // A mean over zero feature bins is NaN, not a distance
        if first.is_empty() {
            return Err(AnalysisError::InvalidInput(String::from(
                "got zero-length feature vectors to compare",
            )));
        }
        for beat_sample in beat_samples {
            if beat_sample.len() != first.len() {
                return Err(AnalysisError::ShapeMismatch {
                    expected: first.len(),
                    actual: beat_sample.len(),
                });
            }
        }
    }

    let beats = beat_samples.len();
    let mut matrix = Array2::zeros((beats, beats));
    for i in 0..beats {
        for j in i..beats {
            matrix[[j, i]] = mse(&beat_samples[i], &beat_samples[j]);
        }
    }
    Ok(matrix)
}

/**
 * Build the similarity matrix of a waveform with the default collaborators,
 * [`OnsetBeatTracker`] and [`MelDesc`] at the waveform's sample rate.
 *
 * Returns the half-filled distance matrix (see [`SelfSimilarity`]), the
 * beat track, and the tempo in BPM.
 */
pub async fn build_similarity_matrix(
    waveform: &Waveform,
) -> Result<(Array2<f32>, BeatTrack, f32), AnalysisError> {
    let builder = SimilarityBuilder::new(
        OnsetBeatTracker::default(),
        MelDesc::new(waveform.sample_rate, N_MELS),
    );
    let similarity = builder.build(waveform).await?;
    Ok((similarity.matrix, similarity.beat_track, similarity.tempo))
}
