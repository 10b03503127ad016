//! One-shot TCP command exchanges with a device.
//! Opens a fresh connection per request, awaits a single response frame, then closes.

use crate::error::{CozyError, Result};
use crate::protocol::{Envelope, Payload, Response, TCP_COMMAND_PORT};
use log::debug;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

/// Default bound on a full request/response exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Performs correlated request/response exchanges against a device's fixed
/// command port.
///
/// Every call opens its own short-lived connection; there is no pooling and
/// no retry. Retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    port: u16,
    timeout: Duration,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandChannel {
    pub fn new() -> Self {
        Self {
            port: TCP_COMMAND_PORT,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the command port (tests and non-standard firmware).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send one command and await exactly one response frame.
    ///
    /// Fails with [`CozyError::Connection`] if the socket cannot connect or
    /// write, [`CozyError::Decode`] if the response does not parse, and
    /// [`CozyError::Timeout`] if no response arrives within the bound. The
    /// connection is dropped in every outcome.
    pub async fn send(&self, addr: IpAddr, payload: Payload) -> Result<Response> {
        let envelope = Envelope::new(payload);
        let request = envelope.encode_framed()?;
        debug!(
            "Sending cmd {:?} to {}:{} ({} bytes)",
            envelope.cmd,
            addr,
            self.port,
            request.len()
        );

        match timeout(self.timeout, self.exchange(addr, &request)).await {
            Ok(result) => result,
            // Dropping the in-flight future closes the socket.
            Err(_) => Err(CozyError::Timeout),
        }
    }

    async fn exchange(&self, addr: IpAddr, request: &[u8]) -> Result<Response> {
        let mut stream = TcpStream::connect((addr, self.port))
            .await
            .map_err(|e| CozyError::Connection(e.to_string()))?;
        stream
            .write_all(request)
            .await
            .map_err(|e| CozyError::Connection(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| CozyError::Connection(e.to_string()))?;
        if read == 0 {
            return Err(CozyError::Connection(
                "connection closed before response".to_string(),
            ));
        }

        debug!("Received response frame: {}", line.trim_end());
        Response::decode(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandType, StatusMap};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn one_shot_device(response: Response) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            Envelope::decode(buf[..n].strip_suffix(b"\r\n").unwrap()).unwrap();
            socket
                .write_all(&response.encode_framed().unwrap())
                .await
                .unwrap();
        });
        port
    }

    #[tokio::test]
    async fn send_resolves_with_decoded_response() {
        let response = Response {
            res: 0,
            cmd: CommandType::Query,
            data: StatusMap::from([("1".to_string(), json!(255))]),
        };
        let port = one_shot_device(response.clone()).await;
        let channel = CommandChannel::new().with_port(port);
        let got = channel.send(LOCALHOST, Payload::query_all()).await.unwrap();
        assert_eq!(got, response);
    }

    #[tokio::test]
    async fn send_times_out_and_closes_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (eof_tx, eof_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            socket.read(&mut buf).await.unwrap();
            // Never answer; the next read returns 0 once the caller
            // gives up and drops its end.
            let after_timeout = socket.read(&mut buf).await.unwrap();
            let _ = eof_tx.send(after_timeout);
        });

        let channel = CommandChannel::new()
            .with_port(port)
            .with_timeout(Duration::from_millis(100));
        let err = channel.send(LOCALHOST, Payload::query_all()).await;
        assert!(matches!(err, Err(CozyError::Timeout)));
        assert_eq!(eof_rx.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_fails_on_refused_connection() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let channel = CommandChannel::new().with_port(port);
        let err = channel.send(LOCALHOST, Payload::query_all()).await;
        assert!(matches!(err, Err(CozyError::Connection(_))));
    }

    #[tokio::test]
    async fn send_fails_on_garbage_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"not json\r\n").await.unwrap();
        });
        let channel = CommandChannel::new().with_port(port);
        let err = channel.send(LOCALHOST, Payload::query_all()).await;
        assert!(matches!(err, Err(CozyError::Decode(_))));
    }
}
