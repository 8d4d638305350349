//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AudioClip, CaptureEvent, CaptureEvents, SpeechCapture, SpeechToText};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Captures audio from the default input device
///
/// With a recognizer attached, the buffer recorded so far is transcribed
/// every `partial_interval` and each result is emitted as a partial
/// hypothesis.
pub struct MicrophoneCapture {
    config: Option<StreamConfig>,
    buffer: SampleBuffer,
    stream: Option<Stream>,
    recognizer: Option<Arc<SpeechToText>>,
    partial_interval: Duration,
    recognition: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
}

impl MicrophoneCapture {
    /// Probe the default input device
    ///
    /// Never fails: without a usable device the capture reports itself
    /// unsupported.
    #[must_use]
    pub fn new(recognizer: Option<SpeechToText>, partial_interval: Duration) -> Self {
        let config = match probe_input_config() {
            Ok(config) => {
                tracing::debug!(
                    sample_rate = SAMPLE_RATE,
                    channels = config.channels,
                    recognizer = recognizer.is_some(),
                    "audio capture initialized"
                );
                Some(config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable, capture disabled");
                None
            }
        };

        Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            recognizer: recognizer.map(Arc::new),
            partial_interval,
            recognition: None,
            events: None,
        }
    }

    /// Get captured samples without clearing them
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Discard captured samples
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Spawn the periodic transcription task, if a recognizer and a runtime exist
    fn spawn_recognition(&self, tx: mpsc::UnboundedSender<CaptureEvent>) -> Option<JoinHandle<()>> {
        let recognizer = Arc::clone(self.recognizer.as_ref()?);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, live transcription disabled");
            return None;
        };

        let buffer = Arc::clone(&self.buffer);
        let interval = self.partial_interval;

        Some(runtime.spawn(async move {
            let mut transcribed_len = 0;
            loop {
                tokio::time::sleep(interval).await;

                let samples = buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if samples.len() == transcribed_len {
                    continue;
                }
                transcribed_len = samples.len();

                let event = match samples_to_wav(&samples, SAMPLE_RATE) {
                    Ok(wav) => match recognizer.transcribe(&wav).await {
                        Ok(text) if text.trim().is_empty() => continue,
                        Ok(text) => CaptureEvent::Partial(text.trim().to_string()),
                        Err(e) => CaptureEvent::Error(e.to_string()),
                    },
                    Err(e) => CaptureEvent::Error(e.to_string()),
                };

                if tx.send(event).is_err() {
                    break;
                }
            }
        }))
    }
}

impl SpeechCapture for MicrophoneCapture {
    fn is_supported(&self) -> bool {
        self.config.is_some()
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn start(&mut self) -> Result<CaptureEvents> {
        let Some(config) = self.config.clone() else {
            tracing::warn!("capture requested but no microphone is available");
            return Err(Error::SpeechUnsupported);
        };
        if self.stream.is_some() {
            return Err(Error::CaptureActive);
        }

        self.clear_buffer();
        let (tx, rx) = mpsc::unbounded_channel();

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

        let buffer = Arc::clone(&self.buffer);
        let error_tx = tx.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let _ = error_tx.send(CaptureEvent::Error(err.to_string()));
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        self.recognition = self.spawn_recognition(tx.clone());
        self.stream = Some(stream);
        self.events = Some(tx);

        tracing::debug!("audio capture started");
        Ok(rx)
    }

    fn stop(&mut self) -> Result<Option<AudioClip>> {
        let Some(stream) = self.stream.take() else {
            return Ok(None);
        };
        drop(stream);

        if let Some(task) = self.recognition.take() {
            task.abort();
        }
        if let Some(tx) = self.events.take() {
            let _ = tx.send(CaptureEvent::End);
        }

        let samples = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(samples = samples.len(), "audio capture stopped");

        if samples.is_empty() {
            return Ok(None);
        }
        samples_to_wav(&samples, SAMPLE_RATE).map(|wav| Some(AudioClip::wav(wav)))
    }
}

/// Capture stand-in for hosts without a microphone
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCapture;

impl SpeechCapture for UnsupportedCapture {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_active(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<CaptureEvents> {
        tracing::warn!("speech capture is not supported here");
        Err(Error::SpeechUnsupported)
    }

    fn stop(&mut self) -> Result<Option<AudioClip>> {
        Ok(None)
    }
}

/// Find a mono 16kHz configuration on the default input device
fn probe_input_config() -> Result<StreamConfig> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable audio config found".to_string()))?;

    Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

/// Classify a stream construction failure
fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("input device disappeared".to_string())
        }
        BuildStreamError::BackendSpecific { err } => {
            let lower = err.description.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                Error::PermissionDenied
            } else {
                Error::DeviceUnavailable(err.description)
            }
        }
        other => Error::Audio(other.to_string()),
    }
}

/// Convert f32 samples to WAV bytes for upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_has_riff_header() {
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 / 50.0).sin() * 0.5).collect();
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }

    #[test]
    fn wav_clamps_out_of_range_samples() {
        let wav = samples_to_wav(&[2.0, -2.0], SAMPLE_RATE).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![32767, -32768]);
    }

    #[test]
    fn unsupported_capture_refuses_to_start() {
        let mut capture = UnsupportedCapture;
        assert!(!capture.is_supported());
        assert!(matches!(capture.start(), Err(Error::SpeechUnsupported)));
        assert_eq!(capture.stop().unwrap(), None);
    }
}
