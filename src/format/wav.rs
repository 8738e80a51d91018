//! Streaming WAV header.
//!
//! See: http://soundfile.sapp.org/doc/WaveFormat/

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
pub const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data (16 bytes for PCM).
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// Audio format code for PCM (uncompressed).
const WAV_FORMAT_PCM: u16 = 1;

/// Bits per sample for 16-bit audio.
const WAV_BITS_PER_SAMPLE: u16 = 16;

/// Placeholder length for a stream of unknown duration.
const STREAMING_DATA_SIZE: u32 = u32::MAX - WAV_HEADER_SIZE as u32;

/// Builds a 16-bit PCM WAV header for a stream of unknown length.
///
/// The RIFF and data sizes are set to their maximum, which players treat as
/// "read until end of stream". This header is the initialization segment of
/// an `audio/wav` session; data segments carry raw s16le samples.
pub fn streaming_wav_header(sample_rate: u32, channels: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(WAV_HEADER_SIZE);

    buf.put_slice(b"RIFF");
    buf.put_u32_le(WAV_HEADER_SIZE as u32 - 8 + STREAMING_DATA_SIZE);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(WAV_FMT_CHUNK_SIZE);
    buf.put_u16_le(WAV_FORMAT_PCM);
    buf.put_u16_le(channels);
    buf.put_u32_le(sample_rate);
    let block_align = channels * (WAV_BITS_PER_SAMPLE / 8);
    buf.put_u32_le(sample_rate * u32::from(block_align));
    buf.put_u16_le(block_align);
    buf.put_u16_le(WAV_BITS_PER_SAMPLE);

    buf.put_slice(b"data");
    buf.put_u32_le(STREAMING_DATA_SIZE);

    buf.freeze()
}
