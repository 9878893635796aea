//! Serial transport shared by the controller drivers.
//!
//! A [`Transport`] owns one duplex byte stream for its whole lifetime. It adds
//! no framing of its own; drivers supply complete command bytes and a
//! predicate that recognises the end of a reply.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: type-erased boxed stream (real port, duplex, or mock)
//! - [`ReadOutcome`]: reply bytes tagged as complete or truncated by timeout
//!
//! # Example
//!
//! ```rust,ignore
//! use xystage_core::serial::Transport;
//! use std::time::Duration;
//!
//! let mut transport = Transport::open("/dev/ttyACM1", 9600).await?;
//! transport.flush_input().await;
//! transport.write(b"C9 0\n").await?;
//! let reply = transport
//!     .read_until(|buf| buf.contains(&b'>'), Duration::from_secs(2))
//!     .await?;
//! ```

use crate::error::StageResult;
use crate::limits::{READ_POLL_INTERVAL, STALE_DRAIN_WINDOW, STALE_READ_SLICE};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can back a
/// transport: `tokio_serial::SerialStream`, `tokio::io::DuplexStream`, or the
/// in-memory ports from `xystage-driver-mock`.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Read Outcome
// =============================================================================

/// Bytes collected by [`Transport::read_until`].
///
/// `Complete` means the terminator predicate matched; `Partial` means the
/// timeout elapsed first and the buffer holds whatever had arrived (possibly
/// nothing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Terminator seen.
    Complete(Vec<u8>),
    /// Timed out first; whatever had arrived.
    Partial(Vec<u8>),
}

impl ReadOutcome {
    /// Raw bytes regardless of completeness.
    pub fn bytes(&self) -> &[u8] {
        match self {
            ReadOutcome::Complete(bytes) | ReadOutcome::Partial(bytes) => bytes,
        }
    }

    /// Whether the terminator was seen.
    pub fn is_complete(&self) -> bool {
        matches!(self, ReadOutcome::Complete(_))
    }

    /// Whether no bytes at all were received.
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Reply decoded as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Exclusive owner of one serial link.
///
/// All methods take `&mut self`: one exchange at a time, never interleaved.
pub struct Transport {
    port: DynSerial,
    name: String,
    poll_interval: Duration,
}

impl Transport {
    /// Wrap an already-open stream.
    pub fn from_stream(name: impl Into<String>, port: DynSerial) -> Self {
        Self {
            port,
            name: name.into(),
            poll_interval: READ_POLL_INTERVAL,
        }
    }

    /// Override the delay between read attempts on `WouldBlock`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Port identifier this transport was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a serial port, 8N1 without flow control, with DTR de-asserted.
    ///
    /// Asserting DTR resets the microcontroller on most boards, so it is
    /// dropped right after opening. Platforms that refuse the request only
    /// get a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Connection`](crate::StageError::Connection) if
    /// the port cannot be opened.
    #[cfg(feature = "serial")]
    pub async fn open(port_path: &str, baud_rate: u32) -> StageResult<Self> {
        use crate::error::StageError;
        use tokio_serial::{SerialPort, SerialPortBuilderExt};

        let path_owned = port_path.to_string();
        let opened = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&path_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| StageError::Connection {
            port: port_path.to_string(),
            message: format!("spawn_blocking for serial port opening failed: {}", e),
        })?;

        let mut stream = opened.map_err(|e| StageError::Connection {
            port: port_path.to_string(),
            message: e.to_string(),
        })?;

        if let Err(e) = stream.write_data_terminal_ready(false) {
            tracing::warn!(port = port_path, error = %e, "Could not de-assert DTR");
        }

        tracing::info!(port = port_path, baud_rate, "Opened serial port");
        Ok(Self::from_stream(port_path, Box::new(stream)))
    }

    /// Discard bytes already waiting on the port.
    ///
    /// Replies that arrived after an earlier exchange timed out would
    /// otherwise be read as the answer to the next command. Returns the number
    /// of bytes discarded.
    pub async fn flush_input(&mut self) -> usize {
        let mut discard = [0u8; 256];
        let deadline = Instant::now() + STALE_DRAIN_WINDOW;
        let mut total_discarded = 0usize;

        while Instant::now() < deadline {
            match tokio::time::timeout(STALE_READ_SLICE, self.port.read(&mut discard)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total_discarded += n,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        if total_discarded > 0 {
            tracing::trace!(
                port = %self.name,
                discarded = total_discarded,
                "Discarded stale input"
            );
        }
        total_discarded
    }

    /// Send bytes exactly as given.
    pub async fn write(&mut self, bytes: &[u8]) -> StageResult<()> {
        self.port.write_all(bytes).await?;
        self.port.flush().await?;
        Ok(())
    }

    /// Accumulate bytes until `done(buffer)` holds or `timeout` elapses.
    ///
    /// A timeout is not an error: the bytes gathered so far come back as
    /// [`ReadOutcome::Partial`]. Only genuine I/O failures are returned as
    /// `Err`.
    pub async fn read_until<P>(&mut self, mut done: P, timeout: Duration) -> StageResult<ReadOutcome>
    where
        P: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut buffer = Vec::with_capacity(64);
        let mut chunk = [0u8; 64];

        loop {
            if done(&buffer) {
                return Ok(ReadOutcome::Complete(buffer));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ReadOutcome::Partial(buffer));
            }

            match tokio::time::timeout(remaining, self.port.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    tracing::debug!(port = %self.name, "Serial stream closed mid-reply");
                    return Ok(ReadOutcome::Partial(buffer));
                }
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {}
            }
        }
    }
}
