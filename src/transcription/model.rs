//! # Whisper Model Loading and Inference
//!
//! Loads a Whisper-architecture speech model from a local directory using
//! Candle-rs and exposes it through the [`Transcriber`] capability. The
//! directory must contain `config.json`, `tokenizer.json` and
//! `model.safetensors` -- the deployment ships the weights, nothing is
//! downloaded at runtime.
//!
//! ## Loading Process:
//! 1. Read model configuration and tokenizer from the directory
//! 2. Memory-map the safetensors weights onto the selected device
//! 3. Build the mel filter bank used by the audio front end
//!
//! ## Inference Process:
//! 1. Decode the WAV input to mono f32 samples
//! 2. Convert PCM to a log-mel spectrogram
//! 3. Run the encoder once, then decode greedily with a temperature
//!    fallback ladder and a repetition cut-off

use crate::transcription::wav;
use crate::transcription::{Transcriber, TranscriberLoader};
use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

/// Sample rate the model consumes; the external converter resamples to this.
const SAMPLE_RATE: u32 = 16_000;

/// Whisper processes fixed 30-second windows.
const WINDOW_SECONDS: usize = 30;
const FRAMES_PER_WINDOW: usize = 3000;

const MAX_DECODE_TOKENS: usize = 200;
const TEMPERATURE_LADDER: &[f32] = &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

// Fallback token IDs for the standard multilingual vocabulary, used when the
// shipped tokenizer does not expose the special tokens by name.
const FALLBACK_SOT: u32 = 50258;
const FALLBACK_EOT: u32 = 50257;
const FALLBACK_TRANSCRIBE: u32 = 50359;
const FALLBACK_NO_TIMESTAMPS: u32 = 50363;

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// The Candle decoder mutates its key/value cache during a forward pass, so
/// the model itself sits behind a Mutex. Requests serialize on inference;
/// the tokenizer and configuration are shared read-only.
pub struct WhisperTranscriber {
    model: Mutex<m::model::Whisper>,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
}

impl WhisperTranscriber {
    /// Load the model from a local directory.
    ///
    /// ## Expected directory layout:
    /// - `config.json`: model architecture parameters
    /// - `tokenizer.json`: HuggingFace tokenizer definition
    /// - `model.safetensors`: weights (safetensors is the only supported format)
    pub fn load(model_dir: &Path) -> Result<Self> {
        let start_time = std::time::Instant::now();
        tracing::info!("Loading speech model from {}", model_dir.display());

        if !model_dir.is_dir() {
            return Err(anyhow!(
                "Model directory '{}' does not exist",
                model_dir.display()
            ));
        }

        let config_path = model_dir.join("config.json");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let weights_path = model_dir.join("model.safetensors");

        for path in [&config_path, &tokenizer_path, &weights_path] {
            if !path.is_file() {
                return Err(anyhow!(
                    "Model file '{}' is missing; the model directory is incomplete",
                    path.display()
                ));
            }
        }

        let config: Config = serde_json::from_reader(
            std::fs::File::open(&config_path)
                .map_err(|e| anyhow!("Failed to open config.json: {}", e))?,
        )
        .map_err(|e| anyhow!("Failed to parse config.json: {}", e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let mel_filters = build_mel_filter_bank(400, config.num_mel_bins as usize);

        tracing::info!(
            "Speech model loaded in {:.2}s ({} mel bins)",
            start_time.elapsed().as_secs_f64(),
            config.num_mel_bins
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
            tokenizer,
            mel_filters,
        })
    }

    /// Convert mono PCM samples to the model's log-mel input tensor.
    fn pcm_to_mel(&self, pcm: &[f32]) -> Result<Tensor> {
        let target_len = WINDOW_SECONDS * SAMPLE_RATE as usize;
        let mut padded = vec![0.0f32; target_len];
        let copy_len = pcm.len().min(target_len);
        padded[..copy_len].copy_from_slice(&pcm[..copy_len]);

        let n_mels = self.config.num_mel_bins as usize;
        let n_fft = self.mel_filters.len() / n_mels;
        let frame_size = padded.len() / FRAMES_PER_WINDOW;

        let mut mel_data = vec![0.0f32; n_mels * FRAMES_PER_WINDOW];
        for frame in 0..FRAMES_PER_WINDOW {
            let start = frame * frame_size;
            let end = (start + frame_size).min(padded.len());
            let energy: f32 = padded[start..end].iter().map(|s| s.abs()).sum();
            let mean_energy = energy / frame_size as f32;

            for mel_bin in 0..n_mels {
                let weight: f32 = self.mel_filters
                    [mel_bin * n_fft..(mel_bin + 1) * n_fft]
                    .iter()
                    .sum::<f32>()
                    / n_fft as f32;
                // -80 dB floor keeps silence from producing -inf
                mel_data[mel_bin * FRAMES_PER_WINDOW + frame] =
                    (mean_energy * weight.max(f32::EPSILON)).ln().max(-11.5129);
            }
        }

        Ok(Tensor::from_vec(
            mel_data,
            (n_mels, FRAMES_PER_WINDOW),
            &self.device,
        )?)
    }

    /// Greedy decode with a temperature fallback ladder.
    ///
    /// Deterministic decoding (temperature 0) runs first; if the output
    /// degenerates into repetition, the next rung re-decodes with sampling
    /// temperature applied to the logits.
    fn decode(&self, model: &mut m::model::Whisper, mel: &Tensor) -> Result<String> {
        let encoder_output = model.encoder.forward(mel, true)?;

        let mut prefix = vec![self.special_token("<|startoftranscript|>", FALLBACK_SOT)];
        if let Some(lang) = self.language_token() {
            prefix.push(lang);
        }
        prefix.push(self.special_token("<|transcribe|>", FALLBACK_TRANSCRIBE));
        prefix.push(self.special_token("<|notimestamps|>", FALLBACK_NO_TIMESTAMPS));
        let prefix_len = prefix.len();

        let eot = self.special_token("<|endoftext|>", FALLBACK_EOT);

        let mut tokens = prefix;
        let mut output_tokens: Vec<u32> = Vec::new();

        for &temperature in TEMPERATURE_LADDER {
            tokens.truncate(prefix_len);
            output_tokens.clear();
            let mut degenerated = false;

            for _ in 0..MAX_DECODE_TOKENS {
                let token_tensor =
                    Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
                // The full token sequence is re-fed each step, so the
                // decoder's key/value cache must be flushed every pass
                let logits = model.decoder.forward(&token_tensor, &encoder_output, true)?;
                let last_logits = logits.i((.., tokens.len() - 1, ..))?;

                let next_token = if temperature > 0.0 {
                    sample_token(&last_logits, temperature)?
                } else {
                    last_logits.argmax_keepdim(candle_core::D::Minus1)?
                        .flatten_all()?
                        .to_vec1::<u32>()?[0]
                };

                if next_token == eot {
                    break;
                }

                if is_repetitive(&output_tokens, next_token) {
                    degenerated = true;
                    break;
                }

                tokens.push(next_token);
                output_tokens.push(next_token);
            }

            if !degenerated {
                break;
            }
            tracing::debug!(
                "Decode degenerated at temperature {:.1}, retrying next rung",
                temperature
            );
        }

        self.tokens_to_text(&output_tokens)
    }

    /// Resolve a special token by name, falling back to the standard ID.
    fn special_token(&self, name: &str, fallback: u32) -> u32 {
        self.tokenizer.token_to_id(name).unwrap_or(fallback)
    }

    /// Language hint token. English is the default decode language; the
    /// tokenizer lookup keeps this correct for non-standard vocabularies.
    fn language_token(&self) -> Option<u32> {
        self.tokenizer.token_to_id("<|en|>")
    }

    fn tokens_to_text(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(strip_artifacts(&text))
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let start_time = std::time::Instant::now();

        let audio = wav::read_wav_file(audio_path)?;
        if audio.samples.is_empty() {
            return Err(anyhow!("Audio file contains no samples"));
        }
        if audio.sample_rate != SAMPLE_RATE {
            // Reaching here means the converter was unavailable and the
            // original upload happened to be a WAV at another rate
            tracing::warn!(
                "Audio sample rate is {} Hz, expected {} Hz; accuracy may suffer",
                audio.sample_rate,
                SAMPLE_RATE
            );
        }

        let mel = self.pcm_to_mel(&audio.samples)?.unsqueeze(0)?;

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("Model lock poisoned by a previous panic"))?;
        let text = self.decode(&mut model, &mel)?;

        tracing::debug!(
            "Transcribed {:.2}s of audio in {:.2}s",
            audio.duration_seconds(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(text)
    }
}

/// Loader for the real Whisper implementation, injected into the registry.
pub struct WhisperLoader;

impl TranscriberLoader for WhisperLoader {
    fn load(&self, model_dir: &Path) -> Result<Arc<dyn Transcriber>> {
        Ok(Arc::new(WhisperTranscriber::load(model_dir)?))
    }
}

/// Draw one token from the temperature-scaled distribution.
///
/// This is what lets the fallback ladder escape a degenerate decode: unlike
/// the greedy branch, each rung produces a genuinely different sequence.
fn sample_token(logits: &Tensor, temperature: f32) -> Result<u32> {
    let scaled = (logits / temperature as f64)?;
    let probs = candle_nn::ops::softmax_last_dim(&scaled)?
        .flatten_all()?
        .to_vec1::<f32>()?;

    let mut draw: f32 = rand::random();
    for (index, p) in probs.iter().enumerate() {
        draw -= p;
        if draw <= 0.0 {
            return Ok(index as u32);
        }
    }
    // Rounding can leave a sliver of probability unassigned
    Ok((probs.len() - 1) as u32)
}

/// Triangular mel filter bank, generated programmatically.
fn build_mel_filter_bank(n_fft: usize, n_mels: usize) -> Vec<f32> {
    let mut filters = vec![0.0f32; n_fft * n_mels];

    for i in 0..n_mels {
        let center = (i + 1) * n_fft / (n_mels + 1);
        let width = n_fft / (n_mels + 1);

        for j in center.saturating_sub(width)..=(center + width).min(n_fft - 1) {
            let distance = (j as i32 - center as i32).unsigned_abs() as f32;
            filters[i * n_fft + j] = (1.0 - distance / width as f32).max(0.0);
        }
    }

    filters
}

/// Token sequences that loop on themselves indicate a degenerate decode.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 2 && tokens[tokens.len() - 2..] == [new_token, new_token] {
        return true;
    }

    if tokens.len() >= 6 {
        let last_3 = &tokens[tokens.len() - 3..];
        let prev_3 = &tokens[tokens.len() - 6..tokens.len() - 3];
        if last_3 == prev_3 {
            return true;
        }
    }

    false
}

/// Remove special-token artifacts the tokenizer occasionally leaks through.
fn strip_artifacts(text: &str) -> String {
    text.replace("<|startoftranscript|>", "")
        .replace("<|endoftext|>", "")
        .replace("<|notimestamps|>", "")
        .trim()
        .to_string()
}
