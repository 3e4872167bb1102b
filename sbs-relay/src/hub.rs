//! TCP broadcast hub — output-only fan-out of SBS lines.
//!
//! Subscribers connect, never send, and receive every batch written after
//! they joined. A subscriber whose write fails is dropped and shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// One connected downstream client.
pub struct Subscriber {
    pub peer: SocketAddr,
    stream: TcpStream,
}

impl Subscriber {
    pub fn new(peer: SocketAddr, stream: TcpStream) -> Self {
        Subscriber { peer, stream }
    }
}

#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, subscriber: Subscriber) {
        let mut subs = self.subscribers.lock().await;
        info!(peer = %subscriber.peer, subscribers = subs.len() + 1, "Subscriber connected");
        subs.push(subscriber);
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Write `batch` to every subscriber. Returns how many received it.
    ///
    /// The set stays locked for the whole fan-out, so one slow subscriber
    /// delays every other subscriber and every producer waiting to
    /// broadcast. A bounded queue per subscriber would replace this loop.
    pub async fn broadcast(&self, batch: &str) -> usize {
        let mut subs = self.subscribers.lock().await;
        let mut kept = Vec::with_capacity(subs.len());

        for mut sub in subs.drain(..) {
            match sub.stream.write_all(batch.as_bytes()).await {
                Ok(()) => kept.push(sub),
                Err(e) => {
                    info!(peer = %sub.peer, error = %e, "Subscriber dropped");
                    let _ = sub.stream.shutdown().await;
                }
            }
        }

        let delivered = kept.len();
        *subs = kept;
        delivered
    }

    /// Accept subscribers forever. Accept errors back off and retry.
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let local_addr = listener.local_addr().ok();
        info!(local_addr = ?local_addr, "Accepting SBS subscribers");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "TCP_NODELAY not set");
                    }
                    self.add(Subscriber::new(peer, stream)).await;
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed, retrying in 1s");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Connected (server side, client side) pair over loopback.
    async fn pair(listener: &TcpListener) -> (Subscriber, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Subscriber::new(peer, server), client)
    }

    async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_line(&mut line))
            .await
            .expect("no line within 5s")
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.broadcast("MSG,3\n").await, 0);
        assert_eq!(hub.len().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = BroadcastHub::new();
        let (a, client_a) = pair(&listener).await;
        let (b, client_b) = pair(&listener).await;
        hub.add(a).await;
        hub.add(b).await;

        assert_eq!(hub.broadcast("line one\nline two\n").await, 2);

        for client in [client_a, client_b] {
            let mut reader = BufReader::new(client);
            assert_eq!(read_line(&mut reader).await, "line one\n");
            assert_eq!(read_line(&mut reader).await, "line two\n");
        }
    }

    #[tokio::test]
    async fn test_failed_subscriber_isolated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = BroadcastHub::new();

        let (healthy, client) = pair(&listener).await;
        let (mut closed, _closed_client) = pair(&listener).await;
        // Writes on a shut-down socket fail immediately.
        closed.stream.shutdown().await.unwrap();

        hub.add(closed).await;
        hub.add(healthy).await;
        assert_eq!(hub.len().await, 2);

        assert_eq!(hub.broadcast("MSG,3,,,ABC123\n").await, 1);
        assert_eq!(hub.len().await, 1);

        let mut reader = BufReader::new(client);
        assert_eq!(read_line(&mut reader).await, "MSG,3,,,ABC123\n");

        // Later batches still flow to the survivor.
        assert_eq!(hub.broadcast("MSG,3,,,4840D6\n").await, 1);
        assert_eq!(read_line(&mut reader).await, "MSG,3,,,4840D6\n");
    }

    #[tokio::test]
    async fn test_disconnected_client_eventually_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = BroadcastHub::new();
        let (sub, client) = pair(&listener).await;
        hub.add(sub).await;
        drop(client);

        // The first writes may land in the kernel buffer before the reset.
        for _ in 0..50 {
            if hub.broadcast("MSG,3\n").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(hub.len().await, 0);
    }

    #[tokio::test]
    async fn test_accept_loop_registers_subscribers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Arc::new(BroadcastHub::new());
        tokio::spawn(Arc::clone(&hub).accept_loop(listener));

        let client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..100 {
            if hub.len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        {
            let subs = hub.subscribers.lock().await;
            assert!(subs[0].stream.nodelay().unwrap());
        }
        assert_eq!(hub.broadcast("hello\n").await, 1);

        let mut reader = BufReader::new(client);
        assert_eq!(read_line(&mut reader).await, "hello\n");
    }
}
