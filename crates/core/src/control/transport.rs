use super::codec::{CodecError, Reply, ReplyDecoder};
use super::endpoint::{ControlEndpoint, Timeouts};
use onionpay_common::config::control::MAX_LINE_LEN;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Byte stream to the control port.
///
/// Strictly half-duplex: after `write_line` the reply must be consumed with
/// `read_reply` before the next command can be written.
#[derive(Debug)]
pub struct Transport<S = TcpStream> {
    stream: BufReader<S>,
    decoder: ReplyDecoder,
    pending: bool,
    /// Replies to commands whose reply timed out, still to arrive
    stale: usize,
    reply_timeout: Duration,
    peer: String,
}

impl Transport<TcpStream> {
    /// Open a TCP connection to the control port
    pub async fn connect(
        endpoint: &ControlEndpoint,
        timeouts: Timeouts,
    ) -> Result<Self, TransportError> {
        let peer = endpoint.to_string();
        debug!("control: connecting to {}", peer);

        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        let stream = match tokio::time::timeout(timeouts.connect, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("control: connect to {} failed: {}", peer, e);
                return Err(TransportError::Connect {
                    endpoint: peer,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!("control: connect to {} timed out", peer);
                return Err(TransportError::Connect {
                    endpoint: peer,
                    reason: "timed out".to_string(),
                });
            }
        };

        debug!("control: connected to {}", peer);
        Ok(Self::new(stream, peer, timeouts.reply))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// Wrap an already connected stream
    pub fn new(stream: S, peer: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            decoder: ReplyDecoder::new(),
            pending: false,
            stale: 0,
            reply_timeout,
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether a command was written and its reply not read yet
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Write one encoded command line
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.pending {
            return Err(TransportError::ReplyPending);
        }

        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await.map_err(|e| {
            warn!("control: write to {} failed: {}", self.peer, e);
            TransportError::Io(e.to_string())
        })?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        self.pending = true;
        Ok(())
    }

    /// Read the complete reply to the outstanding command.
    ///
    /// The command counts as answered afterwards even when the reply was
    /// invalid or late; a late reply is discarded when it shows up.
    pub async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        if !self.pending {
            return Err(TransportError::NothingPending);
        }

        let result = tokio::time::timeout(self.reply_timeout, self.read_until_reply()).await;
        self.pending = false;

        match result {
            Ok(reply) => reply,
            Err(_) => {
                warn!("control: no reply from {} within {:?}", self.peer, self.reply_timeout);
                self.decoder.reset();
                self.stale += 1;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn read_until_reply(&mut self) -> Result<Reply, TransportError> {
        loop {
            let line = self.read_line().await?;

            // Asynchronous events are only delivered after SETEVENTS
            if !self.decoder.in_progress() && line.starts_with('6') {
                debug!("control: skipping event line {:?}", line.trim_end());
                continue;
            }

            trace!("control: <- {}", line.trim_end());
            let decoded = self.decoder.push(&line);
            if self.stale > 0 && !matches!(decoded, Ok(None)) {
                self.stale -= 1;
                debug!("control: discarding late reply from {}", self.peer);
                continue;
            }
            if let Some(reply) = decoded? {
                return Ok(reply);
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        let limit = (MAX_LINE_LEN + 2) as u64;
        let n = (&mut self.stream)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|e| {
                warn!("control: read from {} failed: {}", self.peer, e);
                TransportError::Io(e.to_string())
            })?;

        if n == 0 {
            debug!("control: {} closed the connection", self.peer);
            return Err(TransportError::Closed);
        }
        if !line.ends_with('\n') && line.len() > MAX_LINE_LEN {
            return Err(TransportError::LineTooLong(MAX_LINE_LEN));
        }

        Ok(line)
    }

    /// Wait until the daemon closes the connection.
    ///
    /// An attached onion service lives exactly as long as this connection,
    /// so this doubles as its liveness signal. Anything the daemon still
    /// sends, including replies nobody waits for, is skipped.
    pub async fn wait_closed(&mut self) -> Result<(), TransportError> {
        self.pending = false;
        self.decoder.reset();

        loop {
            match self.read_line().await {
                Ok(line) => debug!("control: unsolicited line {:?}", line.trim_end()),
                Err(TransportError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Shut the connection down
    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("control: shutdown of {} failed: {}", self.peer, e);
        }
        debug!("control: closed connection to {}", self.peer);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to control port {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Timed out waiting for a reply")]
    Timeout,

    #[error("Control connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Reply line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Previous command still awaits its reply")]
    ReplyPending,

    #[error("No command awaits a reply")]
    NothingPending,

    #[error(transparent)]
    Codec(#[from] CodecError),
}
