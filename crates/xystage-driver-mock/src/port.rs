//! In-memory serial port driven by a device model.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// How a device splits the incoming byte stream into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Requests end with `\n`; the newline (and any `\r`) is stripped.
    Line,
    /// Every byte is a request of its own; `\r` and `\n` are ignored.
    Byte,
}

/// Behaviour behind a [`MockPort`].
pub trait MockDevice: Send + 'static {
    /// Request framing this device expects.
    fn framing(&self) -> Framing;

    /// Produce the reply bytes for one request (may be empty).
    fn respond(&mut self, request: &str) -> String;
}

struct Shared<D> {
    device: D,
    rx: VecDeque<u8>,
    pending: Vec<u8>,
    written: Vec<u8>,
    requests: Vec<String>,
    read_waker: Option<Waker>,
}

impl<D: MockDevice> Shared<D> {
    fn accept(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
        match self.device.framing() {
            Framing::Line => {
                self.pending.extend_from_slice(bytes);
                while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=end).collect();
                    let request = String::from_utf8_lossy(&line)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    self.dispatch(request);
                }
            }
            Framing::Byte => {
                for byte in bytes.iter().filter(|b| !matches!(b, b'\r' | b'\n')) {
                    self.dispatch((*byte as char).to_string());
                }
            }
        }
    }

    fn dispatch(&mut self, request: String) {
        let reply = self.device.respond(&request);
        tracing::trace!(request = %request, reply = %reply, "Mock device exchange");
        self.requests.push(request);
        self.push_rx(reply.as_bytes());
    }

    fn push_rx(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.rx.extend(bytes);
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// Async serial port whose far end is a [`MockDevice`].
///
/// Replies are queued synchronously inside `poll_write`, so a driver sees them
/// on its very next read. Reads with nothing queued stay pending, which is
/// how a silent serial line behaves.
pub struct MockPort<D> {
    shared: Arc<Mutex<Shared<D>>>,
}

/// Inspection handle for a [`MockPort`], usable after the port has been
/// moved into a transport.
pub struct MockHandle<D> {
    shared: Arc<Mutex<Shared<D>>>,
}

impl<D> Clone for MockHandle<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: MockDevice> MockPort<D> {
    /// Create a port and its inspection handle.
    pub fn new(device: D) -> (Self, MockHandle<D>) {
        let shared = Arc::new(Mutex::new(Shared {
            device,
            rx: VecDeque::new(),
            pending: Vec::new(),
            written: Vec::new(),
            requests: Vec::new(),
            read_waker: None,
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl<D: MockDevice> MockHandle<D> {
    /// Everything the driver has written, as text.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.shared.lock().written).into_owned()
    }

    /// Requests the device has answered, in order.
    pub fn requests(&self) -> Vec<String> {
        self.shared.lock().requests.clone()
    }

    /// Forget recorded writes and requests.
    pub fn clear(&self) {
        let mut shared = self.shared.lock();
        shared.written.clear();
        shared.requests.clear();
    }

    /// Queue bytes the driver did not ask for (e.g. a late reply).
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.lock().push_rx(bytes);
    }

    /// Inspect or modify the simulated device.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.shared.lock().device)
    }
}

impl<D: MockDevice> AsyncRead for MockPort<D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut shared = self.shared.lock();
        if shared.rx.is_empty() {
            shared.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = shared.rx.len().min(buf.remaining());
        let chunk: Vec<u8> = shared.rx.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl<D: MockDevice> AsyncWrite for MockPort<D> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared.lock().accept(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Echo(Framing);

    impl MockDevice for Echo {
        fn framing(&self) -> Framing {
            self.0
        }

        fn respond(&mut self, request: &str) -> String {
            format!("<{}>", request)
        }
    }

    #[tokio::test]
    async fn test_line_framing_waits_for_newline() {
        let (mut port, handle) = MockPort::new(Echo(Framing::Line));

        port.write_all(b"C9 ").await.unwrap();
        assert!(handle.requests().is_empty());

        port.write_all(b"0\r\n").await.unwrap();
        assert_eq!(handle.requests(), vec!["C9 0".to_string()]);

        let mut buf = [0u8; 16];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<C9 0>");
        assert_eq!(handle.written(), "C9 0\r\n");
    }

    #[tokio::test]
    async fn test_byte_framing_answers_each_byte() {
        let (mut port, handle) = MockPort::new(Echo(Framing::Byte));

        port.write_all(b"ab\n").await.unwrap();
        assert_eq!(handle.requests(), vec!["a".to_string(), "b".to_string()]);

        let mut buf = [0u8; 16];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<a><b>");
    }

    #[tokio::test]
    async fn test_silent_port_stays_pending() {
        let (mut port, handle) = MockPort::new(Echo(Framing::Line));
        let mut buf = [0u8; 4];

        let read = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            port.read(&mut buf),
        )
        .await;
        assert!(read.is_err());

        handle.inject(b"late");
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"late");
    }
}
