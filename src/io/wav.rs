//! Minimal RIFF/WAVE codec used for test material, impulse responses and the
//! command-line renderer.

use std::io::{Read, Write};
use std::path::Path;

use crate::core::types::{AudioBuffer, Sample};
use crate::error::{DspError, Result};

const WAV_FORMAT_PCM: u16 = 1;
const WAV_FORMAT_IEEE_FLOAT: u16 = 3;
const WAV_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const RIFF_HEADER_LEN: usize = 12;
const FMT_CHUNK_MIN_LEN: usize = 16;

/// Decoded `fmt ` chunk.
#[derive(Debug, Clone, Copy)]
struct FormatChunk {
    code: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn invalid(msg: impl Into<String>) -> DspError {
    DspError::InvalidFormat(msg.into())
}

/// Decodes a WAV image held in memory.
///
/// Supports 16/24-bit PCM and 32-bit float, any channel count.
pub fn read_wav(data: &[u8]) -> Result<AudioBuffer> {
    if data.len() < RIFF_HEADER_LEN {
        return Err(invalid("WAV data too short"));
    }
    if &data[0..4] != b"RIFF" {
        return Err(invalid("missing RIFF header"));
    }
    if &data[8..12] != b"WAVE" {
        return Err(invalid("missing WAVE identifier"));
    }

    let mut format: Option<FormatChunk> = None;
    let mut payload: Option<&[u8]> = None;
    let mut cursor = RIFF_HEADER_LEN;

    while cursor + 8 <= data.len() {
        let id = &data[cursor..cursor + 4];
        let size = read_u32_le(data, cursor + 4) as usize;
        let body_start = cursor + 8;
        let body_end = body_start.saturating_add(size).min(data.len());
        let body = &data[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < FMT_CHUNK_MIN_LEN {
                    return Err(invalid("fmt chunk too short"));
                }
                let mut code = read_u16_le(body, 0);
                if code == WAV_FORMAT_EXTENSIBLE && body.len() >= 26 {
                    // Sub-format GUID starts with the plain format code.
                    code = read_u16_le(body, 24);
                }
                format = Some(FormatChunk {
                    code,
                    channels: read_u16_le(body, 2),
                    sample_rate: read_u32_le(body, 4),
                    bits_per_sample: read_u16_le(body, 14),
                });
            }
            b"data" => payload = Some(body),
            _ => {}
        }

        // Chunks are word aligned.
        cursor = body_start.saturating_add(size + (size & 1));
    }

    let format = format.ok_or_else(|| invalid("no fmt chunk found"))?;
    let payload = payload.ok_or_else(|| invalid("no data chunk found"))?;

    let mut samples: Vec<Sample> = match (format.code, format.bits_per_sample) {
        (WAV_FORMAT_PCM, 16) => payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        (WAV_FORMAT_PCM, 24) => payload
            .chunks_exact(3)
            .map(|b| {
                // Place the 24 bits high in an i32 so the shift sign-extends.
                let raw = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                raw as f32 / 8_388_608.0
            })
            .collect(),
        (WAV_FORMAT_IEEE_FLOAT, 32) => payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (code, bits) => {
            return Err(invalid(format!(
                "unsupported WAV encoding: format {}, {} bits",
                code, bits
            )))
        }
    };

    let channels = format.channels as usize;
    if channels > 0 {
        samples.truncate(samples.len() - samples.len() % channels);
    }
    AudioBuffer::new(samples, format.channels, format.sample_rate)
}

/// Reads and decodes a WAV file from disk.
pub fn read_wav_file(path: impl AsRef<Path>) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)
        .map_err(|e| DspError::IoError(format!("{}: {}", path.display(), e)))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| DspError::IoError(format!("{}: {}", path.display(), e)))?;
    let buffer = read_wav(&data)?;
    log::debug!(
        "read {}: {} frames, {} ch, {} Hz",
        path.display(),
        buffer.num_frames(),
        buffer.channels,
        buffer.sample_rate
    );
    Ok(buffer)
}

/// Encodes `buffer` as a 32-bit float WAV image.
pub fn write_wav_float(buffer: &AudioBuffer) -> Vec<u8> {
    let channels = buffer.channels;
    let bytes_per_sample: u16 = 4;
    let block_align = channels * bytes_per_sample;
    let byte_rate = buffer.sample_rate * block_align as u32;
    let data_size = (buffer.data.len() * bytes_per_sample as usize) as u32;

    let mut out = Vec::with_capacity(44 + data_size as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&(FMT_CHUNK_MIN_LEN as u32).to_le_bytes());
    out.extend_from_slice(&WAV_FORMAT_IEEE_FLOAT.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&buffer.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for &sample in &buffer.data {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Writes `buffer` to disk as a 32-bit float WAV file.
pub fn write_wav_file_float(path: impl AsRef<Path>, buffer: &AudioBuffer) -> Result<()> {
    let path = path.as_ref();
    let data = write_wav_float(buffer);
    let mut file = std::fs::File::create(path)
        .map_err(|e| DspError::IoError(format!("{}: {}", path.display(), e)))?;
    file.write_all(&data)
        .map_err(|e| DspError::IoError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

#[inline]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
