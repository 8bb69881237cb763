//! Audio embedding module.
//!
//! Seam towards a pretrained audio embedding model. The model itself stays
//! external behind [`AudioEmbedder`]; this module slices a waveform into
//! per-beat clips and feeds them to the embedder in fixed-size batches.

use log::debug;

use crate::{AnalysisError, BeatTrack, Waveform};

/// Clips sent per embedder call.
pub const EMBED_BATCH_SIZE: usize = 10;

/**
 * Audio embedding collaborator.
 *
 * Clips arrive at the waveform's native sample rate; an implementor backed
 * by a model with a fixed input rate is expected to resample on its side.
 * The contract is one embedding per clip, in clip order.
 */
#[allow(async_fn_in_trait)]
pub trait AudioEmbedder {
    async fn get_audio_features(
        &self,
        clips: &[Vec<f32>],
        sample_rate: u32,
    ) -> Result<Vec<Vec<f32>>, AnalysisError>;
}

/// Owned per-beat clips of `waveform`, one per interval of `beat_track`.
pub fn beat_clips(
    waveform: &Waveform,
    beat_track: &BeatTrack,
) -> Result<Vec<Vec<f32>>, AnalysisError> {
    let mut clips = Vec::with_capacity(beat_track.len());
    for (start, end) in beat_track.intervals() {
        if end < start || end > waveform.len() {
            return Err(AnalysisError::InvalidInput(format!(
                "beat interval {}..{} outside a waveform of {} samples",
                start,
                end,
                waveform.len(),
            )));
        }
        clips.push(waveform.sample_array[start..end].to_vec());
    }
    Ok(clips)
}

/**
 * Embed every beat interval of `waveform`.
 *
 * Clips go out in batches of [`EMBED_BATCH_SIZE`], awaited one batch at a
 * time; the results are concatenated in beat order. An embedder failure, or
 * a batch answered with the wrong number of embeddings, aborts the run.
 */
pub async fn embed_beat_clips<E: AudioEmbedder>(
    embedder: &E,
    waveform: &Waveform,
    beat_track: &BeatTrack,
) -> Result<Vec<Vec<f32>>, AnalysisError> {
    let clips = beat_clips(waveform, beat_track)?;
    let mut features: Vec<Vec<f32>> = Vec::with_capacity(clips.len());
    for (i, batch) in clips.chunks(EMBED_BATCH_SIZE).enumerate() {
        debug!("embedding batch {} ({} clips)", i, batch.len());
        let batch_features = embedder
            .get_audio_features(batch, waveform.sample_rate)
            .await?;
        if batch_features.len() != batch.len() {
            return Err(AnalysisError::ShapeMismatch {
                expected: batch.len(),
                actual: batch_features.len(),
            });
        }
        features.extend(batch_features);
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingEmbedder {
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl AudioEmbedder for RecordingEmbedder {
        async fn get_audio_features(
            &self,
            clips: &[Vec<f32>],
            _sample_rate: u32,
        ) -> Result<Vec<Vec<f32>>, AnalysisError> {
            self.batch_sizes.lock().unwrap().push(clips.len());
            Ok(clips
                .iter()
                .map(|clip| vec![clip.len() as f32, clip[0]])
                .collect())
        }
    }

    struct MiscountingEmbedder;

    impl AudioEmbedder for MiscountingEmbedder {
        async fn get_audio_features(
            &self,
            clips: &[Vec<f32>],
            _sample_rate: u32,
        ) -> Result<Vec<Vec<f32>>, AnalysisError> {
            Ok(vec![vec![0.]; clips.len() - 1])
        }
    }

    fn counting_waveform(length: usize) -> Waveform {
        Waveform::new((0..length).map(|x| x as f32).collect(), 22050)
    }

    #[test]
    fn test_beat_clips() {
        let waveform = counting_waveform(10);
        let clips = beat_clips(&waveform, &BeatTrack::new(vec![3, 7])).unwrap();
        assert_eq!(vec![vec![0., 1., 2.], vec![3., 4., 5., 6.]], clips);
    }

    #[test]
    fn test_beat_clips_outside_waveform() {
        let waveform = counting_waveform(10);
        let result = beat_clips(&waveform, &BeatTrack::new(vec![3, 400]));
        assert!(matches!(result, Err(AnalysisError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_embed_batches_of_ten() {
        // 23 beats, 4 samples apart
        let waveform = counting_waveform(92);
        let beat_track = BeatTrack::new((1..=23).map(|i| i * 4).collect());
        let embedder = RecordingEmbedder {
            batch_sizes: Mutex::new(Vec::new()),
        };

        let features = embed_beat_clips(&embedder, &waveform, &beat_track)
            .await
            .unwrap();
        assert_eq!(23, features.len());
        assert_eq!(vec![10, 10, 3], *embedder.batch_sizes.lock().unwrap());
        // Order survives batching: clip k starts at sample 4k
        for (k, feature) in features.iter().enumerate() {
            assert_eq!(4., feature[0]);
            assert_eq!((4 * k) as f32, feature[1]);
        }
    }

    #[tokio::test]
    async fn test_embed_no_beats() {
        let waveform = counting_waveform(16);
        let embedder = RecordingEmbedder {
            batch_sizes: Mutex::new(Vec::new()),
        };

        let features = embed_beat_clips(&embedder, &waveform, &BeatTrack::default())
            .await
            .unwrap();
        assert!(features.is_empty());
        assert!(embedder.batch_sizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedder_count_mismatch() {
        let waveform = counting_waveform(20);
        let beat_track = BeatTrack::new(vec![5, 10, 15]);

        let result = embed_beat_clips(&MiscountingEmbedder, &waveform, &beat_track).await;
        assert!(matches!(
            result,
            Err(AnalysisError::ShapeMismatch {
                expected: 3,
                actual: 2,
            })
        ));
    }
}
