//! Length-prefixed frame codec for the editor connection.
//!
//! Each message on the wire is a six-digit lowercase hexadecimal byte count
//! followed immediately by that many bytes of UTF-8 payload:
//!
//! ```text
//! 00002a(:emacs-rex (swank:connection-info) nil t 1)
//! ```
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). [`read_frame`] and
//! [`encode_frame`] cover one-off reads and writes outside a framed stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Width of the hexadecimal length header in bytes.
pub const HEADER_LEN: usize = 6;

/// Largest payload a six-digit header can describe.
pub const MAX_PAYLOAD_BYTES: usize = 0x00FF_FFFF;

/// Codec for six-hex-digit length-prefixed frames.
///
/// # Decoder
///
/// Buffers until the header and the full declared payload are available,
/// then yields the payload as a `String`. A header that is not six hex
/// digits, or a payload that is not UTF-8, returns [`AppError::Framing`].
/// End of stream inside a frame is also a framing error.
///
/// # Encoder
///
/// Prepends the lowercase header. Payloads longer than
/// [`MAX_PAYLOAD_BYTES`] return [`AppError::Framing`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new `FrameCodec`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = parse_header(&src[..HEADER_LEN])?;
        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|e| AppError::Framing(format!("payload is not utf-8: {e}")))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Framing(format!(
                "stream closed with {} bytes of incomplete frame",
                src.len()
            ))),
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let header = header_for(item.len())?;
        dst.reserve(HEADER_LEN + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

/// Encode `payload` as a complete frame.
///
/// # Errors
///
/// Returns [`AppError::Framing`] when the payload exceeds [`MAX_PAYLOAD_BYTES`].
pub fn encode_frame(payload: &str) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    FrameCodec.encode(payload.to_owned(), &mut buf)?;
    Ok(buf.to_vec())
}

/// Read exactly one frame from `reader`, waiting until it is complete.
///
/// # Errors
///
/// Returns [`AppError::Framing`] on a bad header, non-UTF-8 payload, or
/// when the stream ends before the declared length is read.
pub async fn read_frame<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| AppError::Framing(format!("failed to read header: {e}")))?;
    let len = parse_header(&header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::Framing(format!("failed to read {len} byte payload: {e}")))?;
    String::from_utf8(payload).map_err(|e| AppError::Framing(format!("payload is not utf-8: {e}")))
}

fn header_for(len: usize) -> Result<String> {
    if len > MAX_PAYLOAD_BYTES {
        return Err(AppError::Framing(format!(
            "payload of {len} bytes exceeds {MAX_PAYLOAD_BYTES}"
        )));
    }
    Ok(format!("{len:06x}"))
}

fn parse_header(raw: &[u8]) -> Result<usize> {
    if !raw.iter().all(u8::is_ascii_hexdigit) {
        return Err(AppError::Framing(format!(
            "invalid length header {:?}",
            String::from_utf8_lossy(raw)
        )));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|e| AppError::Framing(format!("invalid length header: {e}")))?;
    usize::from_str_radix(text, 16)
        .map_err(|e| AppError::Framing(format!("invalid length header {text:?}: {e}")))
}
