//! UDP-based device discovery.
//! Broadcasts scan requests on a timer and decodes device announcement responses.

use crate::error::{CozyError, Result};
use crate::protocol::{
    CommandType, Envelope, Payload, UDP_BIND_PORT, UDP_SCAN_ADDRESS, UDP_SCAN_PORT,
};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// A device's broadcast response to a discovery scan.
///
/// Identity fields come from the INFO payload; the endpoint comes from the
/// UDP source address, not the payload.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// Stable unique identifier, the device's durable key
    pub mac: String,
    /// Device serial number
    pub did: Option<String>,
    /// Product id, used for type classification
    pub pid: Option<String>,
    /// Hardware version
    pub hv: Option<String>,
    /// Software (firmware) version
    pub sv: Option<String>,
    pub brand: Option<String>,
    /// Source address of the UDP response
    pub addr: IpAddr,
    /// Source port of the UDP response
    pub port: u16,
}

/// Discovers CozyLife devices on the local network using UDP broadcast.
///
/// Broadcasting stops after `scan_count` ticks (0 = scan forever), but the
/// socket stays bound so late announcements and unsolicited status reports
/// keep arriving until [`Discovery::stop`].
#[derive(Debug, Clone)]
pub struct Scanner {
    /// Local address to bind to
    pub bind_addr: String,
    /// Local port to bind to
    pub bind_port: u16,
    /// Scan target address (broadcast by default)
    pub scan_addr: String,
    /// Scan target port
    pub scan_port: u16,
    /// Time between scan broadcasts
    pub interval: Duration,
    /// Number of broadcasts before scanning stops; 0 scans forever
    pub scan_count: u32,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Create a new Scanner with the vendor defaults.
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: UDP_BIND_PORT,
            scan_addr: UDP_SCAN_ADDRESS.to_string(),
            scan_port: UDP_SCAN_PORT,
            interval: Duration::from_millis(3000),
            scan_count: 10,
        }
    }

    pub fn with_bind(mut self, addr: &str, port: u16) -> Self {
        self.bind_addr = addr.to_string();
        self.bind_port = port;
        self
    }

    pub fn with_scan_target(mut self, addr: &str, port: u16) -> Self {
        self.scan_addr = addr.to_string();
        self.scan_port = port;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_scan_count(mut self, scan_count: u32) -> Self {
        self.scan_count = scan_count;
        self
    }

    /// Create and configure the broadcast UDP socket.
    fn create_socket(&self) -> Result<UdpSocket> {
        let addr: SocketAddr = format!("{}:{}", self.bind_addr, self.bind_port)
            .parse()
            .map_err(|e| CozyError::Bind(format!("invalid bind address: {}", e)))?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| CozyError::Bind(e.to_string()))?;

        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set reuse_address: {}", e);
        }
        if let Err(e) = socket.set_broadcast(true) {
            warn!("Failed to set broadcast: {}", e);
        }

        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| CozyError::Bind(format!("{}: {}", addr, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| CozyError::Bind(e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| CozyError::Bind(e.to_string()))
    }

    /// Bind the discovery socket and start the scan/receive task.
    ///
    /// Bind failure is fatal and returned here; everything after that
    /// (malformed datagrams, failed sends) is logged and non-fatal.
    pub async fn start(self) -> Result<Discovery> {
        let socket = Arc::new(self.create_socket()?);
        info!(
            "UDP discovery bound to {}:{}",
            self.bind_addr, self.bind_port
        );

        let target: SocketAddr = format!("{}:{}", self.scan_addr, self.scan_port)
            .parse()
            .map_err(|e| CozyError::Bind(format!("invalid scan target: {}", e)))?;

        let (tx, rx) = mpsc::channel::<Announcement>(100);
        let cancel_token = CancellationToken::new();

        let task_socket = socket.clone();
        let token = cancel_token.clone();
        let scanner = self.clone();
        tokio::spawn(async move {
            scanner.run(task_socket, target, tx, token).await;
        });

        Ok(Discovery {
            socket,
            rx,
            cancel_token,
        })
    }

    async fn run(
        self,
        socket: Arc<UdpSocket>,
        target: SocketAddr,
        tx: mpsc::Sender<Announcement>,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut count = 0u32;
        let mut scanning = true;
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick(), if scanning => {
                    self.broadcast_scan(&socket, target).await;
                    count += 1;
                    if self.scan_count != 0 && count >= self.scan_count {
                        info!("Scan finished after {} broadcasts", count);
                        scanning = false;
                    }
                }
                res = socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, src)) => {
                            if let Some(announcement) = parse_announcement(&buf[..len], src) {
                                if tx.send(announcement).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("UDP receive error: {}", e);
                        }
                    }
                }
            }
        }
        debug!("Discovery task stopped");
    }

    async fn broadcast_scan(&self, socket: &UdpSocket, target: SocketAddr) {
        let request = match Envelope::scan_request().encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode scan request: {}", e);
                return;
            }
        };
        match socket.send_to(&request, target).await {
            Ok(len) => debug!("Broadcast scan request to {} ({} bytes)", target, len),
            Err(e) => warn!("Failed to send scan broadcast to {}: {}", target, e),
        }
    }
}

/// Decode a datagram into an announcement.
///
/// Only INFO envelopes are discovery responses; decode failures and
/// off-topic commands are dropped, not fatal.
fn parse_announcement(data: &[u8], src: SocketAddr) -> Option<Announcement> {
    let envelope = match Envelope::decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Dropping undecodable datagram from {}: {}", src, e);
            return None;
        }
    };

    if envelope.cmd != CommandType::Info {
        debug!(
            "Dropping non-discovery datagram from {} (cmd {:?})",
            src, envelope.cmd
        );
        return None;
    }

    let fields = match envelope.payload {
        Payload::Info(fields) => fields,
        _ => return None,
    };

    let mac = match field_string(&fields, "mac") {
        Some(mac) => mac,
        None => {
            debug!("Dropping discovery response without mac from {}", src);
            return None;
        }
    };

    Some(Announcement {
        mac,
        did: field_string(&fields, "did"),
        pid: field_string(&fields, "pid"),
        hv: field_string(&fields, "hv"),
        sv: field_string(&fields, "sv"),
        brand: field_string(&fields, "brand"),
        addr: src.ip(),
        port: src.port(),
    })
}

fn field_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// A running discovery session: the shared UDP socket, the announcement
/// feed and the cancellation handle.
///
/// Any component may send on [`socket`](Self::socket); only the internal
/// scan task reads from it.
pub struct Discovery {
    socket: Arc<UdpSocket>,
    rx: mpsc::Receiver<Announcement>,
    cancel_token: CancellationToken,
}

impl Discovery {
    /// Await the next announcement. Returns `None` once stopped.
    pub async fn next(&mut self) -> Option<Announcement> {
        self.rx.recv().await
    }

    /// The process-wide discovery socket.
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Stop broadcasting and receiving.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Consume the session into a stream of announcements.
    pub fn into_stream(mut self) -> impl futures_core::Stream<Item = Announcement> + Send {
        async_stream::stream! {
            while let Some(announcement) = self.rx.recv().await {
                yield announcement;
            }
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
