//! The chunked response protocol: typed chunks, encoding and decoding.
//!
//! On the wire every chunk is one frame terminated by a blank line:
//!
//! ```text
//! data: <fragment>\n\n        zero or more, in emission order
//! data: [DONE]\n\n            terminal, success
//! data: [ERROR] <message>\n\n terminal, replaces [DONE]
//! ```
//!
//! A fragment that itself contains `\n` is written as several consecutive
//! `data: ` lines inside one frame, so a fragment can never introduce a
//! blank line. The decoder joins them back with `\n`.
//!
//! A fragment that would read as a terminal frame (`[DONE]`, or text
//! starting with `[ERROR]`) is written with one extra leading `\`. The
//! decoder strips it again, so only the sentinel frames themselves end a
//! response. Fragments with leading backslashes in front of such text get
//! one more backslash, which keeps the escaping reversible.
//!
//! [`FrameDecoder`] is an incremental parser: bytes may arrive split at any
//! point (inside a frame, inside a multi-byte character) and frames are only
//! parsed once their terminating blank line has been seen.

use futures::stream::{self, Stream, StreamExt};
use std::borrow::Cow;
use thiserror::Error;

const DATA_FIELD: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
const ERROR_SENTINEL: &str = "[ERROR]";
const ESCAPE: char = '\\';

/// One unit of the relay protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A text fragment, forwarded exactly as received from upstream.
    Data(String),
    /// Successful end of the response.
    Done,
    /// Failed end of the response, with a caller-visible message.
    Error(String),
}

impl StreamChunk {
    /// `true` for [`StreamChunk::Done`] and [`StreamChunk::Error`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamChunk::Data(_))
    }

    /// Encode this chunk as a complete wire frame.
    pub fn encode(&self) -> String {
        match self {
            StreamChunk::Data(text) => {
                let mut out = String::with_capacity(text.len() + 9);
                let payload = if needs_escape(text) {
                    Cow::Owned(format!("{ESCAPE}{text}"))
                } else {
                    Cow::Borrowed(text.as_str())
                };
                for line in payload.split('\n') {
                    out.push_str(DATA_FIELD);
                    out.push(' ');
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            StreamChunk::Done => format!("{DATA_FIELD} {DONE_SENTINEL}\n\n"),
            StreamChunk::Error(message) => {
                // Terminal messages are single-line by construction.
                let message = message.replace(['\r', '\n'], " ");
                let message = message.trim();
                if message.is_empty() {
                    format!("{DATA_FIELD} {ERROR_SENTINEL}\n\n")
                } else {
                    format!("{DATA_FIELD} {ERROR_SENTINEL} {message}\n\n")
                }
            }
        }
    }
}

/// A protocol violation found while decoding frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A complete frame was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// A frame arrived after the terminal frame.
    #[error("frame received after terminal frame")]
    AfterTerminal,

    /// The byte stream ended in the middle of a frame.
    #[error("byte stream ended with {0} bytes of an incomplete frame")]
    Incomplete(usize),
}

/// Incremental frame parser.
///
/// ```rust
/// use edgequake_docstream::frame::{FrameDecoder, StreamChunk};
///
/// let mut dec = FrameDecoder::new();
/// dec.feed(b"data: Hel");
/// assert_eq!(dec.next_chunk(), None);
/// dec.feed(b"lo\n\ndata: [DONE]\n\n");
/// assert_eq!(dec.next_chunk(), Some(Ok(StreamChunk::Data("Hello".into()))));
/// assert_eq!(dec.next_chunk(), Some(Ok(StreamChunk::Done)));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    terminated: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes as they arrive from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether a terminal chunk has been decoded.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Frames with no `data:` lines (comments, keep-alives) are skipped.
    pub fn next_chunk(&mut self) -> Option<Result<StreamChunk, FrameError>> {
        loop {
            let end = find_frame_end(&self.buf)?;
            let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
            let frame = &frame[..end];

            let Ok(text) = std::str::from_utf8(frame) else {
                return Some(Err(FrameError::InvalidUtf8));
            };
            let Some(payload) = parse_data_lines(text) else {
                continue;
            };
            if self.terminated {
                return Some(Err(FrameError::AfterTerminal));
            }

            let chunk = classify_payload(payload);
            self.terminated = chunk.is_terminal();
            return Some(Ok(chunk));
        }
    }

    /// Signal end of input. Fails if a partial frame is still buffered.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(())
        } else {
            Err(FrameError::Incomplete(self.buf.len()))
        }
    }
}

/// Decode a stream of byte buffers into chunks.
///
/// A partial frame left over when the byte stream ends is reported once as
/// [`FrameError::Incomplete`].
pub fn decode_byte_stream<S, B>(bytes: S) -> impl Stream<Item = Result<StreamChunk, FrameError>>
where
    S: Stream<Item = B> + Unpin,
    B: AsRef<[u8]>,
{
    stream::unfold(
        (bytes, FrameDecoder::new(), false),
        |(mut bytes, mut dec, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(item) = dec.next_chunk() {
                    return Some((item, (bytes, dec, false)));
                }
                match bytes.next().await {
                    Some(buf) => dec.feed(buf.as_ref()),
                    None => {
                        return match dec.finish() {
                            Ok(()) => None,
                            Err(e) => Some((Err(e), (bytes, dec, true))),
                        }
                    }
                }
            }
        },
    )
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Join the values of all `data:` lines; `None` when the frame has none.
fn parse_data_lines(frame: &str) -> Option<String> {
    let mut payload: Option<String> = None;
    for line in frame.split('\n') {
        let Some(value) = line.strip_prefix(DATA_FIELD) else {
            // Comments (":") and other fields are not part of the payload.
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match payload.as_mut() {
            Some(p) => {
                p.push('\n');
                p.push_str(value);
            }
            None => payload = Some(value.to_string()),
        }
    }
    payload
}

/// `true` when `payload` is a terminal sentinel, as the decoder reads it.
fn is_sentinel(payload: &str) -> bool {
    if payload == DONE_SENTINEL {
        return true;
    }
    payload
        .strip_prefix(ERROR_SENTINEL)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// A data fragment needs escaping when it, or what remains of it after its
/// leading backslashes, looks like a sentinel.
fn needs_escape(fragment: &str) -> bool {
    is_sentinel(fragment.trim_start_matches(ESCAPE))
}

fn classify_payload(payload: String) -> StreamChunk {
    if payload == DONE_SENTINEL {
        return StreamChunk::Done;
    }
    if let Some(rest) = payload.strip_prefix(ERROR_SENTINEL) {
        if rest.is_empty() || rest.starts_with(' ') {
            return StreamChunk::Error(rest.trim_start().to_string());
        }
    }
    if payload.starts_with(ESCAPE) && needs_escape(&payload) {
        return StreamChunk::Data(payload[ESCAPE.len_utf8()..].to_string());
    }
    StreamChunk::Data(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<StreamChunk, FrameError>> {
        let mut dec = FrameDecoder::new();
        dec.feed(bytes);
        std::iter::from_fn(|| dec.next_chunk()).collect()
    }

    #[test]
    fn encodes_wire_format() {
        assert_eq!(StreamChunk::Data("Hello".into()).encode(), "data: Hello\n\n");
        assert_eq!(StreamChunk::Done.encode(), "data: [DONE]\n\n");
        assert_eq!(
            StreamChunk::Error("Unsupported file type!".into()).encode(),
            "data: [ERROR] Unsupported file type!\n\n"
        );
        assert_eq!(StreamChunk::Error(String::new()).encode(), "data: [ERROR]\n\n");
    }

    #[test]
    fn multiline_fragment_never_contains_blank_line() {
        let frame = StreamChunk::Data("first\n\nthird\n".into()).encode();
        assert_eq!(frame, "data: first\ndata: \ndata: third\ndata: \n\n");
        assert_eq!(frame.matches("\n\n").count(), 1);
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn error_message_is_flattened_to_one_line() {
        let frame = StreamChunk::Error("line one\nline two".into()).encode();
        assert_eq!(frame, "data: [ERROR] line one line two\n\n");
    }

    #[test]
    fn decodes_fragments_and_terminal() {
        let chunks = decode_all(b"data: Hi\n\ndata:  there\n\ndata: [DONE]\n\n");
        assert_eq!(
            chunks,
            vec![
                Ok(StreamChunk::Data("Hi".into())),
                Ok(StreamChunk::Data(" there".into())),
                Ok(StreamChunk::Done),
            ]
        );
    }

    #[test]
    fn reassembles_frames_split_at_every_byte() {
        let chunks = vec![
            StreamChunk::Data("مرحبا".into()),
            StreamChunk::Data("a\n\nb".into()),
            StreamChunk::Data("[DONE] is not a sentinel here".into()),
            StreamChunk::Error("Translation failed!".into()),
        ];
        let wire: String = chunks.iter().map(StreamChunk::encode).collect();

        let mut dec = FrameDecoder::new();
        let mut out = Vec::new();
        for byte in wire.as_bytes() {
            dec.feed(std::slice::from_ref(byte));
            while let Some(chunk) = dec.next_chunk() {
                out.push(chunk.unwrap());
            }
        }
        assert_eq!(out, chunks);
        assert!(dec.is_terminated());
        assert!(dec.finish().is_ok());
    }

    #[test]
    fn sentinel_lookalike_fragments_stay_data() {
        let fragments = [
            "[DONE]",
            "[ERROR] not really",
            "[ERROR]",
            "\\[DONE]",
            "\\\\[ERROR] x",
        ];
        let mut wire: String = fragments
            .iter()
            .map(|f| StreamChunk::Data(f.to_string()).encode())
            .collect();
        wire.push_str(&StreamChunk::Done.encode());

        assert!(wire.starts_with("data: \\[DONE]\n\n"));
        let expected: Vec<_> = fragments
            .iter()
            .map(|f| Ok(StreamChunk::Data(f.to_string())))
            .chain(std::iter::once(Ok(StreamChunk::Done)))
            .collect();
        assert_eq!(decode_all(wire.as_bytes()), expected);
    }

    #[test]
    fn ordinary_backslashes_are_not_escaped() {
        let frame = StreamChunk::Data("\\frac{1}{2}".into()).encode();
        assert_eq!(frame, "data: \\frac{1}{2}\n\n");
        assert_eq!(
            decode_all(frame.as_bytes()),
            vec![Ok(StreamChunk::Data("\\frac{1}{2}".into()))]
        );
    }

    #[test]
    fn bare_error_sentinel_decodes_with_empty_message() {
        assert_eq!(
            decode_all(b"data: [ERROR]\n\n"),
            vec![Ok(StreamChunk::Error(String::new()))]
        );
    }

    #[test]
    fn comment_frames_are_skipped() {
        assert_eq!(
            decode_all(b": keep-alive\n\ndata: x\n\n"),
            vec![Ok(StreamChunk::Data("x".into()))]
        );
    }

    #[test]
    fn frame_after_terminal_is_a_violation() {
        let chunks = decode_all(b"data: [DONE]\n\ndata: late\n\n");
        assert_eq!(chunks[0], Ok(StreamChunk::Done));
        assert_eq!(chunks[1], Err(FrameError::AfterTerminal));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"data: half a fra");
        assert_eq!(dec.next_chunk(), None);
        assert_eq!(dec.finish(), Err(FrameError::Incomplete(16)));
    }

    #[tokio::test]
    async fn decodes_a_byte_stream() {
        let parts: Vec<&[u8]> = vec![b"data: a", b"b\n", b"\ndata: [DO", b"NE]\n\n"];
        let out: Vec<_> = decode_byte_stream(stream::iter(parts)).collect().await;
        assert_eq!(
            out,
            vec![Ok(StreamChunk::Data("ab".into())), Ok(StreamChunk::Done)]
        );
    }
}
