//! AMP framing and axon argument encoding.
//!
//! A frame is a single header byte (`version << 4 | argc`) followed by `argc`
//! arguments, each prefixed with its length as a big-endian `u32`. Axon packs
//! every argument with a type prefix: `s:` for strings, `j:` for JSON, and no
//! prefix for raw blobs.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Protocol version written in the high nibble of the header byte.
pub const AMP_VERSION: u8 = 1;

/// Upper bound on the number of arguments a header can describe.
pub const MAX_ARGS: usize = 0x0f;

/// Default limit for a single argument. PM2 log lines can be large, but a
/// length beyond this almost always means the stream is out of sync.
pub const DEFAULT_MAX_ARG_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 1;
const LENGTH_PREFIX_LEN: usize = 4;

/// Errors produced while framing AMP messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported AMP version {0}")]
    UnsupportedVersion(u8),

    #[error("argument of {len} bytes exceeds the {max} byte limit")]
    ArgumentTooLarge { len: usize, max: usize },

    #[error("frame has {0} arguments, at most 15 are allowed")]
    TooManyArguments(usize),
}

/// One decoded AMP frame: the raw argument payloads in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AmpFrame {
    pub args: Vec<Bytes>,
}

impl AmpFrame {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }
}

/// Stateless AMP codec for use with `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone, Copy)]
pub struct AmpCodec {
    max_arg_len: usize,
}

impl AmpCodec {
    pub fn new(max_arg_len: usize) -> Self {
        Self { max_arg_len }
    }
}

impl Default for AmpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ARG_LEN)
    }
}

impl Decoder for AmpCodec {
    type Item = AmpFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AmpFrame>, CodecError> {
        let Some(&header) = src.first() else {
            return Ok(None);
        };

        let version = header >> 4;
        if version != AMP_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let argc = usize::from(header & 0x0f);

        // Walk the length prefixes without consuming anything until the
        // whole frame is buffered.
        let mut frame_len = HEADER_LEN;
        for _ in 0..argc {
            if src.len() < frame_len + LENGTH_PREFIX_LEN {
                src.reserve(frame_len + LENGTH_PREFIX_LEN - src.len());
                return Ok(None);
            }
            let prefix = &src[frame_len..frame_len + LENGTH_PREFIX_LEN];
            let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if len > self.max_arg_len {
                return Err(CodecError::ArgumentTooLarge {
                    len,
                    max: self.max_arg_len,
                });
            }
            frame_len += LENGTH_PREFIX_LEN + len;
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len).freeze();
        frame.advance(HEADER_LEN);

        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            let len = frame.get_u32() as usize;
            args.push(frame.split_to(len));
        }

        Ok(Some(AmpFrame { args }))
    }
}

impl Encoder<AmpFrame> for AmpCodec {
    type Error = CodecError;

    fn encode(&mut self, item: AmpFrame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let argc = item.args.len();
        if argc > MAX_ARGS {
            return Err(CodecError::TooManyArguments(argc));
        }

        let body_len: usize = item
            .args
            .iter()
            .map(|arg| LENGTH_PREFIX_LEN + arg.len())
            .sum();
        dst.reserve(HEADER_LEN + body_len);

        dst.put_u8(AMP_VERSION << 4 | argc as u8);
        for arg in item.args {
            if arg.len() > self.max_arg_len {
                return Err(CodecError::ArgumentTooLarge {
                    len: arg.len(),
                    max: self.max_arg_len,
                });
            }
            dst.put_u32(arg.len() as u32);
            dst.put_slice(&arg);
        }
        Ok(())
    }
}

/// A single axon-packed argument.
#[derive(Debug, Clone, PartialEq)]
pub enum AxonArg {
    Str(String),
    Json(serde_json::Value),
    Blob(Bytes),
}

impl AxonArg {
    /// Unpacks a raw argument according to its type prefix.
    ///
    /// A `s:` argument that is not valid UTF-8 is kept as a blob.
    pub fn unpack(raw: Bytes) -> Result<Self, serde_json::Error> {
        if let Some(json) = raw.strip_prefix(b"j:") {
            return serde_json::from_slice(json).map(AxonArg::Json);
        }
        if let Some(text) = raw.strip_prefix(b"s:") {
            if let Ok(text) = std::str::from_utf8(text) {
                return Ok(AxonArg::Str(text.to_owned()));
            }
        }
        Ok(AxonArg::Blob(raw))
    }

    /// Packs the argument with its axon type prefix.
    pub fn pack(&self) -> Bytes {
        match self {
            AxonArg::Str(text) => {
                let mut buf = BytesMut::with_capacity(2 + text.len());
                buf.put_slice(b"s:");
                buf.put_slice(text.as_bytes());
                buf.freeze()
            }
            AxonArg::Json(value) => {
                let mut buf = BytesMut::from(&b"j:"[..]);
                buf.put_slice(value.to_string().as_bytes());
                buf.freeze()
            }
            AxonArg::Blob(bytes) => bytes.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AxonArg::Str(text) => Some(text),
            _ => None,
        }
    }
}
