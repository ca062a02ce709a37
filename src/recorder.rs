use std::io::Cursor;

use crate::input::InputError;

/// A finished recording, encoded as a 16-bit PCM WAV file in memory.
#[derive(Debug, Clone)]
pub struct Recording {
    pub wav: Vec<u8>,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Collects interleaved f32 chunks as they arrive from an input stream and
/// assembles them into one WAV blob on `finish`.
#[derive(Debug)]
pub struct Recorder {
    sample_rate: u32,
    channels: u16,
    chunks: Vec<Vec<f32>>,
}

impl Recorder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            chunks: Vec::new(),
        }
    }

    pub fn push_chunk(&mut self, samples: &[f32]) {
        if !samples.is_empty() {
            self.chunks.push(samples.to_vec());
        }
    }

    /// Total interleaved samples buffered so far.
    pub fn len_samples(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn duration(&self) -> f64 {
        let frames = self.len_samples() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }

    /// Encode everything captured so far as a WAV file.
    pub fn finish(self) -> Result<Recording, InputError> {
        if self.len_samples() == 0 {
            return Err(InputError::EmptyRecording);
        }
        let duration = self.duration();

        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for chunk in &self.chunks {
                for &s in chunk {
                    writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
                }
            }
            writer.finalize()?;
        }

        log::info!(
            "Recorded {:.1}s ({} chunks, {} channels @ {} Hz)",
            duration,
            self.chunks.len(),
            self.channels,
            self.sample_rate
        );

        Ok(Recording {
            wav: cursor.into_inner(),
            duration,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

/// Live capture from the default input device.
#[cfg(feature = "microphone")]
pub mod capture {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::{Recorder, Recording};
    use crate::input::InputError;

    /// Record `duration` of audio from the default microphone.
    ///
    /// The device is released when the stream is dropped at the end of this
    /// function, whether or not recording succeeded.
    pub fn record(duration: Duration) -> Result<Recording, InputError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| InputError::Microphone("no input device found".into()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| InputError::Microphone(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(InputError::Microphone(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();
        log::info!(
            "Recording from {} ({} ch @ {} Hz)",
            device.name().unwrap_or_else(|_| "input".into()),
            channels,
            sample_rate
        );

        let recorder = Arc::new(Mutex::new(Recorder::new(sample_rate, channels)));
        let sink = Arc::clone(&recorder);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut r) = sink.lock() {
                        r.push_chunk(data);
                    }
                },
                |err| log::error!("Microphone stream error: {}", err),
                None,
            )
            .map_err(|e| InputError::Microphone(e.to_string()))?;
        stream
            .play()
            .map_err(|e| InputError::Microphone(e.to_string()))?;

        std::thread::sleep(duration);
        drop(stream);

        let recorder = Arc::try_unwrap(recorder)
            .map_err(|_| InputError::Microphone("input stream still running".into()))?
            .into_inner()
            .map_err(|_| InputError::Microphone("recording buffer poisoned".into()))?;
        recorder.finish()
    }
}
