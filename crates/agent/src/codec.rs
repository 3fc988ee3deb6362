//! Newline-delimited JSON framing for [`StreamFrame`]s.
//!
//! One self-contained JSON object per line, so a reader can parse the
//! stream incrementally. Plugs into `FramedRead`/`FramedWrite`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use toolweave_core::StreamFrame;

#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line framing error: {0}")]
    Lines(#[from] LinesCodecError),

    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject lines longer than `max_length` bytes instead of buffering them.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = StreamFrame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamFrame>, FrameCodecError> {
        while let Some(line) = self.lines.decode(src)? {
            if let Some(frame) = parse_line(&line)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StreamFrame>, FrameCodecError> {
        while let Some(line) = self.lines.decode_eof(src)? {
            if let Some(frame) = parse_line(&line)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl Encoder<StreamFrame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, frame: StreamFrame, dst: &mut BytesMut) -> Result<(), FrameCodecError> {
        <Self as Encoder<&StreamFrame>>::encode(self, &frame, dst)
    }
}

impl Encoder<&StreamFrame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, frame: &StreamFrame, dst: &mut BytesMut) -> Result<(), FrameCodecError> {
        let line = serde_json::to_string(frame)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

/// Blank lines are skipped.
fn parse_line(line: &str) -> Result<Option<StreamFrame>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Encode one frame as a line, without the trailing newline.
pub fn encode_line(frame: &StreamFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Decode one line produced by [`encode_line`] or [`FrameCodec`].
pub fn decode_line(line: &str) -> Result<StreamFrame, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolweave_core::{FinishReason, Usage};

    #[test]
    fn frames_are_one_line_each() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(StreamFrame::Text { value: "a\nb".into() }, &mut buf)
            .unwrap();
        codec
            .encode(
                &StreamFrame::Finish {
                    finish_reason: FinishReason::Stop,
                    usage: Usage::new(1, 2),
                    aborted: false,
                },
                &mut buf,
            )
            .unwrap();

        let text = String::from_utf8(buf.to_vec()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"text","value":"a\nb"}"#);
        assert!(lines[1].contains(r#""finishReason":"stop""#));
    }

    #[test]
    fn decoder_handles_partial_input_and_blank_lines() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"data\",\"val"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ue\":[1]}\n\n{\"type\":\"text\",\"value\":\"x\"}");
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, StreamFrame::Data { value: json!([1]) });
        // No trailing newline yet
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let last = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(last, StreamFrame::Text { value: "x".into() });
    }

    #[test]
    fn malformed_line_is_an_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"nope\"}\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameCodecError::Json(_))
        ));
    }

    #[test]
    fn line_helpers() {
        let frame = StreamFrame::MessageAnnotation {
            value: json!({"step": 0}),
        };
        let line = encode_line(&frame).unwrap();
        assert_eq!(decode_line(&format!("{line}\n")).unwrap(), frame);
    }
}
