//! Loopback UDP channel to the modem process.
//!
//! One socket receives datagrams from the modem, another sends to it. Both
//! message classes share the channel and are told apart by a fixed prefix:
//!
//! ```text
//! modem ──udp:rx_port──► recv loop ──► recv pool ──► detect prefix ──► chat / cot handler
//! sender ──send_chat/send_cot──► send pool ──udp:tx_port──► modem
//! ```
//!
//! The two pools are separate, so an inbound flood cannot push queued sends
//! out. Chat payloads reach their handler without the prefix; CoT payloads
//! keep it (see [`handler_prefix`]). Nothing here ever blocks the caller or returns an error to it: a
//! stopped channel drops sends with a log line.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use lorabridge_types::ChannelTag;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::pool::{Submit, WorkerPool};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::metrics::{bump, BridgeMetrics};

/// Receives inbound payloads of one class.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one payload.
    async fn on_frame(&self, payload: Vec<u8>);
}

#[derive(Default)]
struct Handlers {
    chat: RwLock<Option<Arc<dyn FrameHandler>>>,
    cot: RwLock<Option<Arc<dyn FrameHandler>>>,
}

impl Handlers {
    fn slot(&self, tag: ChannelTag) -> &RwLock<Option<Arc<dyn FrameHandler>>> {
        match tag {
            ChannelTag::Chat => &self.chat,
            ChannelTag::GenericCot => &self.cot,
        }
    }

    fn get(&self, tag: ChannelTag) -> Option<Arc<dyn FrameHandler>> {
        self.slot(tag)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, tag: ChannelTag, handler: Arc<dyn FrameHandler>) {
        *self.slot(tag).write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

struct Running {
    send_socket: Arc<UdpSocket>,
    tx_addr: SocketAddr,
    rx_addr: SocketAddr,
    recv_pool: Arc<WorkerPool>,
    send_pool: Arc<WorkerPool>,
    shutdown: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
}

/// Bidirectional datagram channel to the modem.
pub struct TransportChannel {
    config: TransportConfig,
    metrics: Arc<BridgeMetrics>,
    handlers: Arc<Handlers>,
    lifecycle: Mutex<()>,
    running: RwLock<Option<Running>>,
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn endpoint(host: &str, port: u16) -> TransportResult<SocketAddr> {
    let ip: IpAddr = host.parse().map_err(|_| TransportError::InvalidEndpoint {
        host: host.to_string(),
        port,
    })?;
    Ok(SocketAddr::new(ip, port))
}

async fn bind(addr: SocketAddr) -> TransportResult<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })
}

impl TransportChannel {
    /// Create a stopped channel.
    pub fn new(config: TransportConfig, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            config,
            metrics,
            handlers: Arc::new(Handlers::default()),
            lifecycle: Mutex::new(()),
            running: RwLock::new(None),
        }
    }

    /// True between a successful `start()` and the next `stop()`.
    pub fn is_running(&self) -> bool {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Address the receive socket is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.rx_addr)
    }

    /// Bind both endpoints and launch the receive loop.
    ///
    /// A second call while running is a no-op. On failure the channel stays
    /// stopped.
    pub async fn start(&self) -> TransportResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            tracing::debug!("transport channel already running");
            return Ok(());
        }

        let started = self.bind_all().await;
        let running = match started {
            Ok(running) => running,
            Err(e) => {
                tracing::error!(error = %e, "transport channel failed to start");
                return Err(e);
            }
        };

        tracing::info!(
            rx = %running.rx_addr,
            tx = %running.tx_addr,
            workers = self.config.workers,
            "transport channel started"
        );
        *self.running.write().unwrap_or_else(PoisonError::into_inner) = Some(running);
        Ok(())
    }

    async fn bind_all(&self) -> TransportResult<Running> {
        let rx_addr = endpoint(&self.config.host, self.config.rx_port)?;
        let tx_addr = endpoint(&self.config.host, self.config.tx_port)?;

        let recv_socket = bind(rx_addr).await?;
        let rx_addr = recv_socket
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: rx_addr,
                source,
            })?;
        let send_socket = bind(SocketAddr::new(tx_addr.ip(), 0)).await?;

        let recv_pool = Arc::new(WorkerPool::spawn(
            self.config.workers,
            self.config.queue_capacity,
        ));
        let send_pool = Arc::new(WorkerPool::spawn(1, self.config.queue_capacity));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let recv_task = tokio::spawn(recv_loop(
            recv_socket,
            self.config.recv_buffer,
            shutdown_rx,
            Router {
                handlers: Arc::clone(&self.handlers),
                pool: Arc::clone(&recv_pool),
                metrics: Arc::clone(&self.metrics),
            },
        ));

        Ok(Running {
            send_socket: Arc::new(send_socket),
            tx_addr,
            rx_addr,
            recv_pool,
            send_pool,
            shutdown,
            recv_task,
        })
    }

    /// Close both endpoints and stop all work. Safe to call at any time.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let taken = self
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = taken else {
            return;
        };

        let _ = running.shutdown.send(true);
        let abort = running.recv_task.abort_handle();
        if tokio::time::timeout(self.config.join_timeout(), running.recv_task)
            .await
            .is_err()
        {
            tracing::warn!("receive loop did not stop in time, aborting");
            abort.abort();
        }
        running.recv_pool.shutdown();
        running.send_pool.shutdown();
        tracing::info!("transport channel stopped");
    }

    /// Replace the handler for chat payloads (prefix stripped).
    pub fn register_chat_handler(&self, handler: Arc<dyn FrameHandler>) {
        self.handlers.set(ChannelTag::Chat, handler);
    }

    /// Replace the handler for CoT payloads (prefix kept).
    pub fn register_cot_handler(&self, handler: Arc<dyn FrameHandler>) {
        self.handlers.set(ChannelTag::GenericCot, handler);
    }

    /// Send a chat frame.
    pub fn send_chat(&self, body: &[u8]) {
        self.send(ChannelTag::Chat, body);
    }

    /// Send a CoT frame.
    pub fn send_cot(&self, body: &[u8]) {
        self.send(ChannelTag::GenericCot, body);
    }

    /// Prefix `body` for `tag` and queue it for sending.
    pub fn send(&self, tag: ChannelTag, body: &[u8]) {
        let side = self
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| (Arc::clone(&r.send_socket), r.tx_addr, Arc::clone(&r.send_pool)));
        let Some((socket, tx_addr, pool)) = side else {
            tracing::warn!(channel = ?tag, "transport channel stopped, dropping frame");
            return;
        };

        let datagram = tag.prepend(body);
        let metrics = Arc::clone(&self.metrics);
        let submitted = pool.submit(async move {
            match socket.send_to(&datagram, tx_addr).await {
                Ok(_) => {
                    bump(&metrics.frames_sent);
                    tracing::debug!(channel = ?tag, bytes = datagram.len(), "frame sent");
                }
                Err(e) => tracing::warn!(channel = ?tag, error = %e, "send failed"),
            }
        });
        note_submit(&self.metrics.sends_dropped, "send", submitted);
    }
}

/// Prefix still present on payloads handed to `tag`'s handler.
pub fn handler_prefix(tag: ChannelTag) -> Option<ChannelTag> {
    match tag {
        ChannelTag::Chat => None,
        ChannelTag::GenericCot => Some(ChannelTag::GenericCot),
    }
}

fn note_submit(discarded: &AtomicU64, queue: &'static str, submitted: Submit) {
    match submitted {
        Submit::Queued => {}
        Submit::DiscardedOldest => {
            bump(discarded);
            tracing::warn!(queue, "transport queue full, discarded oldest task");
        }
        Submit::Closed => tracing::debug!(queue, "transport pool closed, task dropped"),
    }
}

struct Router {
    handlers: Arc<Handlers>,
    pool: Arc<WorkerPool>,
    metrics: Arc<BridgeMetrics>,
}

impl Router {
    fn route(&self, datagram: Vec<u8>) {
        let handlers = Arc::clone(&self.handlers);
        let metrics = Arc::clone(&self.metrics);
        let submitted = self.pool.submit(async move {
            dispatch(&handlers, &metrics, datagram).await;
        });
        note_submit(&self.metrics.queue_overflows, "recv", submitted);
    }
}

async fn dispatch(handlers: &Handlers, metrics: &BridgeMetrics, datagram: Vec<u8>) {
    let Some(tag) = ChannelTag::detect(&datagram) else {
        bump(&metrics.unroutable);
        let probe = &datagram[..datagram.len().min(lorabridge_types::ROUTING_PROBE_LEN)];
        tracing::warn!(
            prefix = %String::from_utf8_lossy(probe),
            "unknown routing prefix, dropping datagram"
        );
        return;
    };
    let Some(handler) = handlers.get(tag) else {
        bump(&metrics.unroutable);
        tracing::warn!(channel = ?tag, "no handler registered, dropping datagram");
        return;
    };

    let payload = match handler_prefix(tag) {
        Some(_) => datagram,
        None => datagram[tag.header().len()..].to_vec(),
    };
    handler.on_frame(payload).await;
}

async fn recv_loop(
    socket: UdpSocket,
    buffer: usize,
    mut shutdown: watch::Receiver<bool>,
    router: Router,
) {
    let mut buf = vec![0u8; buffer];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    bump(&router.metrics.frames_received);
                    tracing::debug!(%from, bytes = len, "datagram received");
                    router.route(buf[..len].to_vec());
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    tracing::warn!(error = %e, "receive error");
                }
            },
        }
    }
    tracing::debug!("receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Capture(mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait]
    impl FrameHandler for Capture {
        async fn on_frame(&self, payload: Vec<u8>) {
            let _ = self.0.send(payload);
        }
    }

    fn config(rx_port: u16, tx_port: u16) -> TransportConfig {
        TransportConfig {
            rx_port,
            tx_port,
            ..TransportConfig::default()
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let channel = TransportChannel::new(config(0, 1), Arc::default());
        channel.stop().await;
        assert!(!channel.is_running());
        // Sending while stopped is a logged no-op.
        channel.send_cot(b"x|u|t|T||QQ==");
    }

    #[tokio::test]
    async fn second_start_is_noop() {
        let channel = TransportChannel::new(config(0, 1), Arc::default());
        channel.start().await.unwrap();
        let addr = channel.local_addr().unwrap();
        channel.start().await.unwrap();
        assert_eq!(channel.local_addr(), Some(addr));
        channel.stop().await;
        channel.stop().await;
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn bind_failure_leaves_channel_stopped() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let channel = TransportChannel::new(config(port, 1), Arc::default());
        assert!(matches!(
            channel.start().await,
            Err(TransportError::Bind { .. })
        ));
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn invalid_host_is_rejected() {
        let mut cfg = config(0, 1);
        cfg.host = "not-an-ip".into();
        let channel = TransportChannel::new(cfg, Arc::default());
        assert!(matches!(
            channel.start().await,
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn routes_by_prefix() {
        let metrics = Arc::new(BridgeMetrics::default());
        let channel = TransportChannel::new(config(0, 1), Arc::clone(&metrics));
        let (chat_tx, mut chat_rx) = mpsc::unbounded_channel();
        let (cot_tx, mut cot_rx) = mpsc::unbounded_channel();
        channel.register_chat_handler(Arc::new(Capture(chat_tx)));
        channel.register_cot_handler(Arc::new(Capture(cot_tx)));
        channel.start().await.unwrap();
        let addr = channel.local_addr().unwrap();

        let modem = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        modem.send_to(b"LORA|a|b|c|d|e|f", addr).await.unwrap();
        modem.send_to(b"LORA_COTX|a|b|c|d|e|f", addr).await.unwrap();
        modem.send_to(b"MESH|a|b|c|d|e|f", addr).await.unwrap();

        assert_eq!(recv(&mut chat_rx).await, b"a|b|c|d|e|f");
        assert_eq!(recv(&mut cot_rx).await, b"LORA_COTX|a|b|c|d|e|f");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.unroutable, 1);
        channel.stop().await;
    }

    #[tokio::test]
    async fn sends_with_class_prefix() {
        let modem = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let modem_port = modem.local_addr().unwrap().port();
        let channel = TransportChannel::new(config(0, modem_port), Arc::default());
        channel.start().await.unwrap();

        channel.send_chat(b"hello");
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), modem.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"LORA|hello");

        channel.send_cot(b"world");
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), modem.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"LORA_COTX|world");
        channel.stop().await;
    }

    struct Stall {
        entered: mpsc::UnboundedSender<()>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl FrameHandler for Stall {
        async fn on_frame(&self, _payload: Vec<u8>) {
            let _ = self.entered.send(());
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn inbound_flood_does_not_displace_sends() {
        let modem = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let modem_port = modem.local_addr().unwrap().port();
        let metrics = Arc::new(BridgeMetrics::default());
        let mut cfg = config(0, modem_port);
        cfg.workers = 1;
        cfg.queue_capacity = 1;
        let channel = TransportChannel::new(cfg, Arc::clone(&metrics));
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(tokio::sync::Notify::new());
        channel.register_cot_handler(Arc::new(Stall {
            entered: entered_tx,
            release: Arc::clone(&release),
        }));
        channel.start().await.unwrap();
        let addr = channel.local_addr().unwrap();

        // Park the only receive worker, then overflow its queue.
        modem.send_to(b"LORA_COTX|first", addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        for _ in 0..5 {
            modem.send_to(b"LORA_COTX|flood", addr).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while metrics.snapshot().queue_overflows == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("receive queue should overflow");

        channel.send_cot(b"out");
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), modem.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"LORA_COTX|out");
        assert_eq!(metrics.snapshot().sends_dropped, 0);

        release.notify_waiters();
        channel.stop().await;
    }

    #[test]
    fn discarded_submission_bumps_its_counter() {
        let metrics = BridgeMetrics::default();
        note_submit(&metrics.sends_dropped, "send", Submit::DiscardedOldest);
        note_submit(&metrics.sends_dropped, "send", Submit::Queued);
        note_submit(&metrics.queue_overflows, "recv", Submit::Closed);
        let snap = metrics.snapshot();
        assert_eq!(snap.sends_dropped, 1);
        assert_eq!(snap.queue_overflows, 0);
    }

    #[test]
    fn only_cot_handlers_see_the_prefix() {
        assert_eq!(handler_prefix(ChannelTag::Chat), None);
        assert_eq!(
            handler_prefix(ChannelTag::GenericCot),
            Some(ChannelTag::GenericCot)
        );
    }

    #[tokio::test]
    async fn handler_can_be_replaced() {
        let channel = TransportChannel::new(config(0, 1), Arc::default());
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        channel.register_chat_handler(Arc::new(Capture(first_tx)));
        channel.register_chat_handler(Arc::new(Capture(second_tx)));
        channel.start().await.unwrap();

        let modem = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        modem
            .send_to(b"LORA|x", channel.local_addr().unwrap())
            .await
            .unwrap();
        assert_eq!(recv(&mut second_rx).await, b"x");
        assert!(first_rx.try_recv().is_err());
        channel.stop().await;
    }
}
