//! WAV container decoding for the transcriber input path.
//!
//! Parses the RIFF/WAVE framing and returns mono f32 samples in [-1.0, 1.0].
//! Only uncompressed PCM payloads are supported: 16-bit integer (what the
//! converter produces) and 32-bit IEEE float. Anything else fails decoding
//! and surfaces as a transcription error for the request.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// Decoded audio ready for the model front end.
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// Mono samples, multi-channel input is averaged down
    pub samples: Vec<f32>,
    /// Sample rate as declared by the container
    pub sample_rate: u32,
}

impl WavAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Read and decode a WAV file from disk.
pub fn read_wav_file(path: &Path) -> Result<WavAudio> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("Failed to read audio file: {}", e))?;
    parse_wav(&bytes)
}

/// Decode WAV data from a byte buffer.
pub fn parse_wav(bytes: &[u8]) -> Result<WavAudio> {
    let mut cursor = Cursor::new(bytes);

    let mut riff = [0u8; 4];
    cursor.read_exact(&mut riff)?;
    if &riff != b"RIFF" {
        return Err(anyhow!("Not a WAV file: missing RIFF header"));
    }
    let _riff_size = cursor.read_u32::<LittleEndian>()?;
    let mut wave = [0u8; 4];
    cursor.read_exact(&mut wave)?;
    if &wave != b"WAVE" {
        return Err(anyhow!("Not a WAV file: missing WAVE tag"));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None; // (codec, channels, rate, bits)
    let mut data: Option<Vec<u8>> = None;

    // Walk the chunk list; anything other than fmt/data is skipped
    while let Ok(chunk_id) = read_chunk_id(&mut cursor) {
        let chunk_size = cursor.read_u32::<LittleEndian>()? as u64;

        // Declared sizes are untrusted input; reject before allocating
        let remaining = bytes.len() as u64 - cursor.position();
        if chunk_size > remaining {
            return Err(anyhow!(
                "WAV chunk '{}' declares {} bytes but only {} remain",
                String::from_utf8_lossy(&chunk_id),
                chunk_size,
                remaining
            ));
        }

        match &chunk_id {
            b"fmt " => {
                let codec = cursor.read_u16::<LittleEndian>()?;
                let channels = cursor.read_u16::<LittleEndian>()?;
                let sample_rate = cursor.read_u32::<LittleEndian>()?;
                let _byte_rate = cursor.read_u32::<LittleEndian>()?;
                let _block_align = cursor.read_u16::<LittleEndian>()?;
                let bits = cursor.read_u16::<LittleEndian>()?;
                format = Some((codec, channels, sample_rate, bits));

                // Skip any fmt extension bytes
                if chunk_size > 16 {
                    cursor.seek(SeekFrom::Current(chunk_size as i64 - 16))?;
                }
            }
            b"data" => {
                let mut payload = vec![0u8; chunk_size as usize];
                cursor.read_exact(&mut payload)?;
                data = Some(payload);
            }
            _ => {
                cursor.seek(SeekFrom::Current(chunk_size as i64))?;
            }
        }

        // Chunks are word-aligned; odd sizes carry a pad byte
        if chunk_size % 2 == 1 {
            cursor.seek(SeekFrom::Current(1))?;
        }
    }

    let (codec, channels, sample_rate, bits) =
        format.ok_or_else(|| anyhow!("WAV file has no fmt chunk"))?;
    let data = data.ok_or_else(|| anyhow!("WAV file has no data chunk"))?;

    if channels == 0 {
        return Err(anyhow!("WAV file declares zero channels"));
    }

    let interleaved = match (codec, bits) {
        (FORMAT_PCM, 16) => decode_pcm16(&data)?,
        (FORMAT_IEEE_FLOAT, 32) => decode_float32(&data)?,
        _ => {
            return Err(anyhow!(
                "Unsupported WAV encoding: format {} with {} bits per sample",
                codec,
                bits
            ))
        }
    };

    Ok(WavAudio {
        samples: downmix(&interleaved, channels as usize),
        sample_rate,
    })
}

fn read_chunk_id(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[u8; 4]> {
    let mut id = [0u8; 4];
    cursor.read_exact(&mut id)?;
    Ok(id)
}

fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(anyhow!("PCM16 data length must be even"));
    }
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    for _ in 0..data.len() / 2 {
        let sample = cursor.read_i16::<LittleEndian>()?;
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

fn decode_float32(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 4 != 0 {
        return Err(anyhow!("Float32 data length must be a multiple of 4"));
    }
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 4);
    for _ in 0..data.len() / 4 {
        samples.push(cursor.read_f32::<LittleEndian>()?);
    }
    Ok(samples)
}

/// Average interleaved channels down to mono.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
