//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::task::JoinHandle;

use super::{SpeechPlayback, TextToSpeech, Utterance};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Output stream configuration for the default output device
#[derive(Debug, Clone)]
pub struct AudioOutput {
    config: StreamConfig,
}

impl AudioOutput {
    /// Probe the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                // Fallback: stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && supports_rate(c))
            })
            .ok_or_else(|| Error::DeviceUnavailable("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play mono f32 samples, blocking until done or `cancelled` is set
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be opened
    pub fn play_blocking(&self, samples: Vec<f32>, cancelled: &AtomicBool) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_cb = Arc::clone(&finished);
        let mut position = 0usize;

        let stream = device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or_else(|| {
                            finished_cb.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        position = (position + 1).min(samples.len());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while !finished.load(Ordering::Relaxed) && !cancelled.load(Ordering::Relaxed) {
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(
            samples = sample_count,
            cancelled = cancelled.load(Ordering::Relaxed),
            "playback complete"
        );

        Ok(())
    }
}

/// The utterance currently playing
struct ActivePlayback {
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

/// Speaks replies through the default output device
///
/// Reply text is synthesized with the configured TTS provider; backend audio
/// references are downloaded. Each utterance runs on its own task and
/// replaces the previous one.
pub struct SpeakerPlayback {
    output: Option<Arc<AudioOutput>>,
    tts: Option<Arc<TextToSpeech>>,
    http: reqwest::Client,
    current: Option<ActivePlayback>,
}

impl SpeakerPlayback {
    /// Probe the output device; playback is unsupported without one
    #[must_use]
    pub fn new(tts: Option<TextToSpeech>) -> Self {
        let output = match AudioOutput::new() {
            Ok(output) => Some(Arc::new(output)),
            Err(e) => {
                tracing::warn!(error = %e, "speaker unavailable, playback disabled");
                None
            }
        };

        Self {
            output,
            tts: tts.map(Arc::new),
            http: reqwest::Client::new(),
            current: None,
        }
    }
}

impl SpeechPlayback for SpeakerPlayback {
    fn is_supported(&self) -> bool {
        self.output.is_some()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<()> {
        self.cancel();

        let Some(output) = self.output.clone() else {
            return Err(Error::SpeechUnsupported);
        };
        let tts = self.tts.clone();
        if matches!(utterance, Utterance::Text(_)) && tts.is_none() {
            tracing::debug!("no TTS provider configured, skipping spoken reply");
            return Err(Error::SpeechUnsupported);
        }

        let http = self.http.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            let mp3 = match fetch_audio(&http, tts.as_deref(), &utterance).await {
                Ok(mp3) => mp3,
                Err(e) => {
                    tracing::warn!(error = %e, "could not prepare reply audio");
                    return;
                }
            };
            if flag.load(Ordering::Relaxed) {
                return;
            }

            let played = tokio::task::spawn_blocking(move || {
                let (samples, sample_rate) = decode_mp3(&mp3)?;
                let samples = if sample_rate == PLAYBACK_SAMPLE_RATE {
                    samples
                } else {
                    tracing::debug!(
                        from = sample_rate,
                        to = PLAYBACK_SAMPLE_RATE,
                        "resampling reply audio"
                    );
                    resample(&samples, sample_rate, PLAYBACK_SAMPLE_RATE)?
                };
                output.play_blocking(samples, &flag)
            })
            .await;

            match played {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "reply playback failed"),
                Err(e) => tracing::warn!(error = %e, "reply playback task failed"),
            }
        });

        self.current = Some(ActivePlayback { task, cancelled });
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(active) = self.current.take() {
            active.cancelled.store(true, Ordering::Relaxed);
            active.task.abort();
            tracing::debug!("playback cancelled");
        }
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Playback stand-in that never makes a sound
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPlayback;

impl SpeechPlayback for SilentPlayback {
    fn is_supported(&self) -> bool {
        false
    }

    fn speak(&mut self, _utterance: Utterance) -> Result<()> {
        Err(Error::SpeechUnsupported)
    }

    fn cancel(&mut self) {}
}

/// Obtain MP3 bytes for an utterance
async fn fetch_audio(
    http: &reqwest::Client,
    tts: Option<&TextToSpeech>,
    utterance: &Utterance,
) -> Result<Vec<u8>> {
    match utterance {
        Utterance::Text(text) => {
            let tts = tts.ok_or(Error::SpeechUnsupported)?;
            tts.synthesize(text).await
        }
        Utterance::Audio(url) => {
            let response = http.get(url).send().await?.error_for_status()?;
            Ok(response.bytes().await?.to_vec())
        }
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// An empty stream reports the playback rate.
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let frame_rate = u32::try_from(frame.sample_rate)
                    .map_err(|_| Error::Audio(format!("bad MP3 sample rate {}", frame.sample_rate)))?;
                match sample_rate {
                    None => sample_rate = Some(frame_rate),
                    Some(rate) if rate != frame_rate => {
                        return Err(Error::Audio(format!(
                            "MP3 sample rate changed mid-stream ({rate} -> {frame_rate})"
                        )));
                    }
                    Some(_) => {}
                }
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate.unwrap_or(PLAYBACK_SAMPLE_RATE)))
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded so the tail of the reply is kept.
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Drop the padding, scaled to the output rate
    let expected = samples.len() * to_rate as usize / from_rate as usize;
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mp3_decodes_to_nothing() {
        let (samples, rate) = decode_mp3(&[]).unwrap();
        assert!(samples.is_empty());
        assert_eq!(rate, PLAYBACK_SAMPLE_RATE);
    }

    #[test]
    fn matching_rate_is_not_resampled() {
        let samples = vec![0.25_f32; 500];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn higher_rate_audio_is_shortened_to_playback_rate() {
        // One second of a 440 Hz tone at 48 kHz
        let samples: Vec<f32> = (0..48000_u16)
            .map(|i| (f32::from(i) * 440.0 * std::f32::consts::TAU / 48000.0).sin() * 0.5)
            .collect();

        let resampled = resample(&samples, 48000, PLAYBACK_SAMPLE_RATE).unwrap();

        assert!(resampled.len() <= 24000);
        assert!(resampled.len() > 23000, "got {} samples", resampled.len());
        assert!(resampled.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn silent_playback_is_unsupported() {
        let mut playback = SilentPlayback;
        assert!(!playback.is_supported());
        assert!(matches!(
            playback.speak(Utterance::Text("hi".into())),
            Err(Error::SpeechUnsupported)
        ));
        playback.cancel();
        playback.cancel();
    }
}
