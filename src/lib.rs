//! Library to compute beat-synchronous self-similarity matrices for audio
//! tracks.
//!
//! The entry point is [`similarity::build_similarity_matrix`]: take a mono
//! [`Waveform`] (see [`decode::decode_audio`] for the file front door), track
//! its beats, extract a spectrogram for every beat interval, and compare the
//! per-beat feature vectors pairwise with the mean squared error. The result
//! is a `(beats, beats)` distance matrix, together with the [`BeatTrack`] and
//! the estimated tempo in BPM.

pub mod decode;
pub mod embedding;
pub mod similarity;
pub mod spectral;
pub mod temporal;
pub mod utils;

use thiserror::Error;

pub use crate::similarity::build_similarity_matrix;

/// Number of audio channels every waveform is downmixed to.
pub const CHANNELS: u16 = 1;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("beat tracking failed: {0}")]
    BeatTracking(String),
    #[error("spectrogram extraction failed: {0}")]
    Spectrogram(String),
    #[error("feature vectors have mismatched lengths: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("error while decoding song: {0}")]
    Decoding(String),
}

/// A single-channel audio signal at its native sample rate.
#[derive(Default, Debug, Clone)]
pub struct Waveform {
    pub sample_array: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(sample_array: Vec<f32>, sample_rate: u32) -> Self {
        Waveform {
            sample_array,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.sample_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_array.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.;
        }
        self.sample_array.len() as f32 / self.sample_rate as f32
    }
}

/**
 * Beat positions of a track, as absolute sample indices into the waveform
 * they were computed from.
 *
 * Positions are monotonically non-decreasing. The number of positions is the
 * dimension of the similarity matrix built from the track.
 */
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BeatTrack {
    pub positions: Vec<usize>,
}

impl BeatTrack {
    pub fn new(positions: Vec<usize>) -> Self {
        BeatTrack { positions }
    }

    /// Number of beats.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// `(start, end)` sample ranges of the audio leading up to each beat.
    ///
    /// The first interval starts at sample 0; every other interval starts at
    /// the previous beat. One interval per beat, so the tail of the waveform
    /// after the last beat is not covered.
    pub fn intervals(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.positions.len()).map(move |i| {
            let start = if i == 0 { 0 } else { self.positions[i - 1] };
            (start, self.positions[i])
        })
    }
}
