//! Audio decoding module.
//!
//! Turns an audio file into a mono [`Waveform`] at its native sample rate;
//! multi-channel sources are downmixed by averaging. No resampling happens
//! here, analysis always runs at the rate the file was encoded at.

use std::path::Path;

use log::{info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{AnalysisError, Waveform, CHANNELS};

pub fn decode_audio(path: &Path) -> Result<Waveform, AnalysisError> {
    let file = std::fs::File::open(path)
        .map_err(|e| AnalysisError::Decoding(format!("error while opening {:?}: {}", path, e)))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AnalysisError::Decoding(format!("error while probing format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnalysisError::Decoding(String::from("no audio track found")))?;
    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    if channels == 0 {
        return Err(AnalysisError::Decoding(String::from(
            "stream reports zero audio channels",
        )));
    }
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalysisError::Decoding(String::from("unknown sample rate")))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::Decoding(format!("error while finding codec: {}", e)))?;

    let mut sample_array: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(AnalysisError::Decoding(format!(
                    "error while reading packet: {}",
                    e
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(e)) => {
                warn!("could not decode packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(AnalysisError::Decoding(format!(
                    "error while decoding packet: {}",
                    e
                )))
            }
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        let mut sample_buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        sample_buffer.copy_interleaved_ref(decoded);

        if channels == usize::from(CHANNELS) {
            sample_array.extend_from_slice(sample_buffer.samples());
        } else {
            for frame in sample_buffer.samples().chunks(channels) {
                sample_array.push(frame.iter().sum::<f32>() / channels as f32);
            }
        }
    }

    let waveform = Waveform::new(sample_array, sample_rate);
    info!(
        "decoded {:?}: {} samples at {} Hz ({:.1}s)",
        path,
        waveform.len(),
        waveform.sample_rate,
        waveform.duration(),
    );
    Ok(waveform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f32::consts::PI;

    fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = (f32::sin(2. * PI * 440. * i as f32 / sample_rate as f32)
                * f32::from(i16::MAX)) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_mono_wav() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("mono.wav");
        write_test_wav(&path, 1, 22050, 22050);

        let waveform = decode_audio(&path).unwrap();
        assert_eq!(22050, waveform.sample_rate);
        assert_eq!(22050, waveform.len());
        assert!(waveform.sample_array.iter().all(|x| x.abs() <= 1.));
        assert!(waveform.sample_array.iter().any(|x| x.abs() > 0.5));
    }

    #[test]
    fn test_decode_stereo_downmix() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("stereo.wav");
        write_test_wav(&path, 2, 44100, 4096);

        let waveform = decode_audio(&path).unwrap();
        assert_eq!(44100, waveform.sample_rate);
        // One mono sample per frame, not per interleaved sample
        assert_eq!(4096, waveform.len());
        assert!(0.01 > (waveform.duration() - 4096. / 44100.).abs());
    }

    #[test]
    fn test_decode_missing_file() {
        let result = decode_audio(Path::new("definitely/not/here.wav"));
        assert!(matches!(result, Err(AnalysisError::Decoding(_))));
    }

    #[test]
    fn test_decode_zero_channel_stream() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("broken.wav");

        // Canonical WAV header whose fmt chunk claims zero channels
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&22050u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        std::fs::write(&path, &bytes).unwrap();

        let result = decode_audio(&path);
        assert!(matches!(result, Err(AnalysisError::Decoding(_))));
    }
}
