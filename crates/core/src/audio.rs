//! PCM16 audio utilities
//!
//! All byte buffers are 16-bit signed little-endian PCM. Resampling and
//! mixing work on mono data; multi-channel input is downmixed first.

use rubato::{FftFixedIn, Resampler};
use std::time::Duration;

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Below this many samples the FFT resampler is not worth setting up
const MIN_FFT_SAMPLES: usize = 64;

/// Input chunk fed to the streaming resampler
const STREAM_CHUNK_MS: usize = 10;

/// Zero chunks pushed through the filter at most when draining its tail
const MAX_FLUSH_ROUNDS: usize = 16;

/// Convert PCM16 bytes to normalized f32 samples in [-1.0, 1.0]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_NORMALIZE)
        .collect()
}

/// Convert f32 samples to PCM16 bytes, clamping out-of-range values
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| ((sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16).to_le_bytes())
        .collect()
}

/// Resample mono f32 audio
///
/// Uses rubato's FFT resampler and falls back to linear interpolation for
/// very short buffers or when rubato rejects the input. The output is
/// aligned with the input and has `len * to_rate / from_rate` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    if samples.len() < MIN_FFT_SAMPLES {
        return resample_linear(samples, from_rate, to_rate);
    }

    let mut resampler = StreamResampler::new(from_rate, to_rate);
    let mut output = resampler.push(samples);
    output.extend(resampler.flush());
    output
}

/// Resampler for one continuous mono stream delivered in pieces
///
/// Filter state carries over between [`push`](Self::push) calls, the filter
/// delay is trimmed from the front of the output, and [`flush`](Self::flush)
/// drains the tail. Pushing a stream in pieces yields the same samples as
/// pushing it whole.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    /// Output samples still to drop
    delay: usize,
    consumed: u64,
    produced: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let mut resampler = Self {
            from_rate,
            to_rate,
            inner: None,
            pending: Vec::new(),
            delay: 0,
            consumed: 0,
            produced: 0,
        };
        resampler.rebuild();
        resampler
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample the next piece of the stream
    ///
    /// Returns what the filter has produced so far; up to one chunk of
    /// input stays buffered until more arrives or the stream is flushed.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return resample_linear(samples, self.from_rate, self.to_rate);
        };

        self.pending.extend_from_slice(samples);
        let mut output = Vec::new();

        while self.pending.len() >= inner.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..inner.input_frames_next()).collect();
            self.consumed += chunk.len() as u64;

            match inner.process(std::slice::from_ref(&chunk), None) {
                Ok(wave) => append_aligned(
                    wave,
                    &mut self.delay,
                    &mut self.produced,
                    u64::MAX,
                    &mut output,
                ),
                Err(e) => {
                    tracing::warn!("Rubato processing failed, using linear fallback: {}", e);
                    output.extend(resample_linear(&chunk, self.from_rate, self.to_rate));
                }
            }
        }

        output
    }

    /// Drain the buffered input and the filter tail, then start over
    pub fn flush(&mut self) -> Vec<f32> {
        let mut output = Vec::new();

        if let Some(inner) = self.inner.as_mut() {
            let total_in = self.consumed + self.pending.len() as u64;
            let expected = total_in * self.to_rate as u64 / self.from_rate as u64;

            if !self.pending.is_empty() {
                let tail = std::mem::take(&mut self.pending);
                match inner.process_partial(Some(std::slice::from_ref(&tail)), None) {
                    Ok(wave) => append_aligned(
                        wave,
                        &mut self.delay,
                        &mut self.produced,
                        expected,
                        &mut output,
                    ),
                    Err(e) => {
                        tracing::warn!("Rubato flush failed, using linear fallback: {}", e);
                        output.extend(resample_linear(&tail, self.from_rate, self.to_rate));
                    }
                }
            }

            let mut rounds = 0;
            while self.produced < expected && rounds < MAX_FLUSH_ROUNDS {
                rounds += 1;
                match inner.process_partial(None::<&[Vec<f32>]>, None) {
                    Ok(wave) => append_aligned(
                        wave,
                        &mut self.delay,
                        &mut self.produced,
                        expected,
                        &mut output,
                    ),
                    Err(e) => {
                        tracing::warn!("Rubato flush failed: {}", e);
                        break;
                    }
                }
            }
        }

        self.rebuild();
        output
    }

    fn rebuild(&mut self) {
        self.inner = None;
        self.pending.clear();
        self.delay = 0;
        self.consumed = 0;
        self.produced = 0;

        if self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0 {
            return;
        }

        let chunk = (self.from_rate as usize * STREAM_CHUNK_MS / 1000).max(MIN_FFT_SAMPLES);
        match FftFixedIn::<f32>::new(self.from_rate as usize, self.to_rate as usize, chunk, 2, 1) {
            Ok(resampler) => {
                self.delay = resampler.output_delay();
                self.inner = Some(resampler);
            }
            Err(e) => {
                tracing::warn!("Rubato init failed, using linear fallback: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Append one resampled mono chunk, skipping the remaining filter delay
/// and stopping once `limit` samples have been produced in total
fn append_aligned(
    wave: Vec<Vec<f32>>,
    delay: &mut usize,
    produced: &mut u64,
    limit: u64,
    output: &mut Vec<f32>,
) {
    let Some(channel) = wave.into_iter().next() else {
        return;
    };

    let skip = (*delay).min(channel.len());
    *delay -= skip;

    let room = limit.saturating_sub(*produced);
    let kept = &channel[skip..];
    let kept = &kept[..kept.len().min(usize::try_from(room).unwrap_or(usize::MAX))];
    *produced += kept.len() as u64;
    output.extend_from_slice(kept);
}

/// Linear interpolation resampler
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let floor = (src.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let frac = (src - floor as f64) as f32;
            samples[floor] * (1.0 - frac) + samples[ceil] * frac
        })
        .collect()
}

/// Resample mono PCM16 bytes
pub fn resample_pcm16(audio: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        return audio.to_vec();
    }
    f32_to_pcm16(&resample(&pcm16_to_f32(audio), from_rate, to_rate))
}

/// Downmix interleaved PCM16 to mono by averaging channels
pub fn to_mono(audio: &[u8], num_channels: u16) -> Vec<u8> {
    let channels = num_channels.max(1) as usize;
    if channels == 1 {
        return audio.to_vec();
    }

    let samples = pcm16_to_f32(audio);
    let mono: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    f32_to_pcm16(&mono)
}

/// Sum two mono tracks into one, padding the shorter with silence
pub fn mix_mono(a: &[u8], b: &[u8]) -> Vec<u8> {
    let (a, b) = (pcm16_samples(a), pcm16_samples(b));
    let len = a.len().max(b.len());

    (0..len)
        .flat_map(|i| {
            let sum = a.get(i).copied().unwrap_or(0) as i32 + b.get(i).copied().unwrap_or(0) as i32;
            (sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16).to_le_bytes()
        })
        .collect()
}

/// Interleave two mono tracks as stereo (left, right)
pub fn interleave_stereo(left: &[u8], right: &[u8]) -> Vec<u8> {
    let (left, right) = (pcm16_samples(left), pcm16_samples(right));
    let len = left.len().max(right.len());

    (0..len)
        .flat_map(|i| {
            let l = left.get(i).copied().unwrap_or(0).to_le_bytes();
            let r = right.get(i).copied().unwrap_or(0).to_le_bytes();
            [l[0], l[1], r[0], r[1]]
        })
        .collect()
}

/// Mono PCM16 silence of the given length in samples
pub fn silence(num_samples: usize) -> Vec<u8> {
    vec![0u8; num_samples * 2]
}

/// Mono PCM16 silence covering `duration` at `sample_rate`
pub fn silence_for(duration: Duration, sample_rate: u32) -> Vec<u8> {
    silence((duration.as_secs_f64() * sample_rate as f64) as usize)
}

fn pcm16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
