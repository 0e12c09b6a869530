//! Audio duration probing for usage accounting.
//!
//! Some providers bill audio prompts by the second. Decoding headers is
//! blocking CPU work, so the async entry point pushes it onto a worker
//! thread.

use crate::error::{Error, Result};

/// Duration in seconds of an audio payload. Runs the parse on a blocking
/// worker thread.
pub async fn audio_duration_seconds(data: Vec<u8>, content_type: &str) -> Result<f64> {
    let content_type = content_type.to_string();
    tokio::task::spawn_blocking(move || duration_seconds_sync(&data, &content_type))
        .await
        .map_err(|e| Error::internal(format!("audio probe task failed: {e}")))?
}

fn duration_seconds_sync(data: &[u8], content_type: &str) -> Result<f64> {
    match content_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => wav_duration(data),
        "audio/mpeg" | "audio/mp3" => mp3_duration(data),
        other => Err(Error::InvalidFile(format!(
            "cannot determine duration of {other} audio"
        ))),
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Exact duration from the RIFF header: data chunk length over byte rate.
fn wav_duration(data: &[u8]) -> Result<f64> {
    if data.len() < 44 || &data[..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(Error::InvalidFile("not a RIFF/WAVE payload".into()));
    }
    let mut byte_rate: Option<u32> = None;
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let chunk_id = &data[offset..offset + 4];
        let chunk_size = read_u32_le(data, offset + 4)
            .ok_or_else(|| Error::InvalidFile("truncated WAVE chunk".into()))?
            as usize;
        match chunk_id {
            b"fmt " => byte_rate = read_u32_le(data, offset + 16),
            b"data" => {
                let rate = byte_rate
                    .filter(|r| *r > 0)
                    .ok_or_else(|| Error::InvalidFile("WAVE data before fmt chunk".into()))?;
                return Ok(chunk_size as f64 / f64::from(rate));
            }
            _ => {}
        }
        // Chunks are word-aligned.
        offset += 8 + chunk_size + (chunk_size & 1);
    }
    Err(Error::InvalidFile("WAVE payload has no data chunk".into()))
}

const MP3_BITRATES_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Estimated duration from the first MPEG-1 Layer III frame header,
/// assuming constant bitrate. ID3v2 tags are skipped.
fn mp3_duration(data: &[u8]) -> Result<f64> {
    let mut offset = 0;
    if data.starts_with(b"ID3") && data.len() > 10 {
        let size = data[6..10]
            .iter()
            .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
        offset = 10 + size;
    }
    while offset + 4 <= data.len() {
        if data[offset] == 0xFF && data[offset + 1] & 0xE0 == 0xE0 {
            let bitrate_index = (data[offset + 2] >> 4) as usize;
            let kbps = MP3_BITRATES_KBPS[bitrate_index & 0x0F];
            if kbps == 0 {
                break;
            }
            let audio_bytes = data.len() - offset;
            return Ok(audio_bytes as f64 * 8.0 / (f64::from(kbps) * 1000.0));
        }
        offset += 1;
    }
    Err(Error::InvalidFile("no MPEG frame header found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(seconds: f64, byte_rate: u32) -> Vec<u8> {
        let data_len = (seconds * f64::from(byte_rate)) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&[1, 0, 1, 0]); // PCM, mono
        out.extend_from_slice(&8000u32.to_le_bytes()); // sample rate
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&[2, 0, 16, 0]); // block align, bits
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend(std::iter::repeat(0u8).take(data_len as usize));
        out
    }

    #[tokio::test]
    async fn wav_duration_is_exact() {
        let payload = wav_bytes(2.5, 16_000);
        let duration = audio_duration_seconds(payload, "audio/wav").await.unwrap();
        assert!((duration - 2.5).abs() < 1e-6);
    }

    #[test]
    fn truncated_wav_is_invalid() {
        assert!(wav_duration(b"RIFFxxxx").is_err());
        assert!(wav_duration(b"not audio at all").is_err());
    }

    #[test]
    fn unknown_content_type_is_invalid() {
        let err = duration_seconds_sync(b"xxxx", "audio/ogg").unwrap_err();
        assert!(matches!(err, Error::InvalidFile(_)));
    }
}
