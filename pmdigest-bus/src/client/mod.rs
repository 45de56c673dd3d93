//! Unix-socket subscriber for the PM2 publish socket.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! packet types do not pull in the networking stack.

use crate::amp::AmpCodec;
use crate::objects::{BusError, BusMessage};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::FramedRead;

/// Name of the publish socket inside `PM2_HOME`.
pub const PUB_SOCKET_NAME: &str = "pub.sock";

/// Maximum reconnect backoff exponent (2^6 = 64 seconds).
const MAX_RECONNECT_EXPONENT: u32 = 6;

/// A connected subscriber on the PM2 publish socket.
///
/// Axon pub/sub needs no handshake: once connected, the daemon pushes every
/// published message to this socket.
pub struct BusSubscriber {
    frames: FramedRead<UnixStream, AmpCodec>,
    path: PathBuf,
}

impl BusSubscriber {
    /// Connect to the publish socket at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| BusError::Connect {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            frames: FramedRead::new(stream, AmpCodec::default()),
            path,
        })
    }

    /// Read the next message.
    ///
    /// Returns `None` once the daemon closes the socket. A framing error is
    /// returned once and then the stream ends; a malformed payload only
    /// affects its own message.
    pub async fn next_message(&mut self) -> Option<Result<BusMessage, BusError>> {
        let frame = match self.frames.next().await? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e.into())),
        };
        Some(BusMessage::from_frame(frame))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve the publish socket path from a PM2 home directory.
///
/// Falls back to `$HOME/.pm2` when no home is given, the same default the
/// PM2 CLI uses.
pub fn default_socket_path(pm2_home: Option<&Path>) -> Option<PathBuf> {
    match pm2_home {
        Some(home) => Some(home.join(PUB_SOCKET_NAME)),
        None => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".pm2").join(PUB_SOCKET_NAME)),
    }
}

/// Calculate the delay before the next reconnect attempt.
///
/// Uses exponential backoff: 2^attempt seconds, capped at 64 seconds.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let seconds = 2u64.pow(attempt.min(MAX_RECONNECT_EXPONENT));
    Duration::from_secs(seconds)
}
