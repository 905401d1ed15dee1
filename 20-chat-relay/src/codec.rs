//! Newline-delimited JSON framing.
//!
//! Every frame is one JSON object followed by `\n`. The codec wraps
//! [`LinesCodec`] so partial reads and several frames per read are handled by
//! `tokio_util`, and only layers JSON on top.

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{
    error::{DecodeError, TransportError},
    message::{Inbound, Outbound},
};

pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024;

/// Codec used by the relay: reads client frames, writes relay frames.
pub type ServerCodec = FrameCodec<Inbound, Outbound>;
/// Codec used by clients: reads relay frames, writes client frames.
pub type ClientCodec = FrameCodec<Outbound, Inbound>;

/// Serializes a frame into its wire form, delimiter included.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, TransportError> {
    let mut encoded = serde_json::to_vec(frame).map_err(TransportError::Encode)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Parses one frame. A trailing delimiter is accepted.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes.trim_ascii_end())?)
}

/// Decodes `D` frames and encodes `E` frames.
///
/// Decoding yields `Result<D, DecodeError>` items: a corrupted frame is an
/// item, not a stream error, so `FramedRead` keeps going after it. The
/// `Error` type is reserved for transport failures.
pub struct FrameCodec<D, E> {
    lines: LinesCodec,
    max_len: usize,
    _frames: PhantomData<fn(E) -> D>,
}

impl<D, E> FrameCodec<D, E> {
    pub fn new(max_len: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_len),
            max_len,
            _frames: PhantomData,
        }
    }

    fn next_frame(
        &self,
        line: Result<Option<String>, LinesCodecError>,
    ) -> Option<Result<D, DecodeError>>
    where
        D: DeserializeOwned,
    {
        match line {
            Ok(Some(line)) if line.trim().is_empty() => None,
            Ok(Some(line)) => Some(decode(line.as_bytes())),
            Ok(None) => None,
            Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(DecodeError::TooLong {
                limit: self.max_len,
            })),
            // LinesCodec only performs I/O-free work in decode; its io errors
            // are UTF-8 failures on a line it has already consumed.
            Err(LinesCodecError::Io(_)) => Some(Err(DecodeError::InvalidUtf8)),
        }
    }
}

impl<D, E> Default for FrameCodec<D, E> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl<D: DeserializeOwned, E> Decoder for FrameCodec<D, E> {
    type Item = Result<D, DecodeError>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode(src);
            let more = matches!(line, Ok(Some(_)));
            if let Some(frame) = self.next_frame(line) {
                return Ok(Some(frame));
            }
            // blank line: try the next one
            if !more {
                return Ok(None);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode_eof(src);
            let more = matches!(line, Ok(Some(_)));
            if let Some(frame) = self.next_frame(line) {
                return Ok(Some(frame));
            }
            if !more {
                return Ok(None);
            }
        }
    }
}

impl<D, E: Serialize> Encoder<E> for FrameCodec<D, E> {
    type Error = TransportError;

    fn encode(&mut self, frame: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = encode(&frame)?;
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::error::ProtocolViolation;

    fn help(name: &str) -> Inbound {
        Inbound::Help { name: name.into() }
    }

    #[test]
    fn roundtrip_preserves_frames() {
        let frames = [
            Outbound::Broadcast {
                name: "bob".into(),
                text: "hello, \"world\"\nwith newline".into(),
            },
            Outbound::rejection("", ProtocolViolation::AlreadyLoggedIn),
            Outbound::LoggedOut {
                name: "ünïcode".into(),
            },
        ];
        for frame in frames {
            let bytes = encode(&frame).expect("encode");
            assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
            let parsed: Outbound = decode(&bytes).expect("decode");
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn two_frames_in_one_read_decode_in_order() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&help("a")).expect("encode"));
        buf.extend_from_slice(&encode(&help("b")).expect("encode"));

        let first = codec.decode(&mut buf).expect("io").expect("frame");
        let second = codec.decode(&mut buf).expect("io").expect("frame");
        assert_eq!(first.expect("valid"), help("a"));
        assert_eq!(second.expect("valid"), help("b"));
        assert!(codec.decode(&mut buf).expect("io").is_none());
    }

    #[test]
    fn split_frame_decodes_once_complete() {
        let mut codec = ServerCodec::default();
        let bytes = encode(&help("alice")).expect("encode");
        let (head, tail) = bytes.split_at(7);

        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).expect("io").is_none());
        buf.extend_from_slice(tail);
        let frame = codec.decode(&mut buf).expect("io").expect("frame");
        assert_eq!(frame.expect("valid"), help("alice"));
    }

    #[test]
    fn blank_lines_and_crlf_are_tolerated() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&b"\n\r\n{\"ctrl\":\"help\",\"name\":\"x\"}\r\n"[..]);
        let frame = codec.decode(&mut buf).expect("io").expect("frame");
        assert_eq!(frame.expect("valid"), help("x"));
    }

    #[test]
    fn over_long_frame_is_skipped_and_decoding_resumes() {
        let mut codec = ServerCodec::new(32);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("{}\n", "x".repeat(100)).as_bytes());
        buf.extend_from_slice(&encode(&help("ok")).expect("encode"));

        let first = codec.decode(&mut buf).expect("io").expect("frame");
        assert!(matches!(first, Err(DecodeError::TooLong { limit: 32 })));
        let second = codec.decode(&mut buf).expect("io").expect("frame");
        assert_eq!(second.expect("valid"), help("ok"));
    }

    #[test]
    fn invalid_utf8_is_a_frame_error() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);
        let frame = codec.decode(&mut buf).expect("io").expect("frame");
        assert!(matches!(frame, Err(DecodeError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn malformed_frame_does_not_end_the_stream() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut frames = FramedRead::new(reader, ServerCodec::default());

        writer.write_all(b"not json\n").await.expect("write");
        writer
            .write_all(&encode(&help("after")).expect("encode"))
            .await
            .expect("write");
        drop(writer);

        let bad = frames.next().await.expect("item").expect("io");
        assert!(matches!(bad, Err(DecodeError::Malformed(_))));
        let good = frames.next().await.expect("item").expect("io");
        assert_eq!(good.expect("valid"), help("after"));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn trailing_frame_without_delimiter_decodes_at_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut frames = FramedRead::new(reader, ServerCodec::default());

        writer
            .write_all(br#"{"ctrl":"logout","name":"zed"}"#)
            .await
            .expect("write");
        drop(writer);

        let frame = frames.next().await.expect("item").expect("io");
        assert_eq!(
            frame.expect("valid"),
            Inbound::Logout { name: "zed".into() }
        );
        assert!(frames.next().await.is_none());
    }
}
