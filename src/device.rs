//! Individual device control and state caching.
//! Owns the per-device status snapshot and the periodic poll loop.

use crate::channel::CommandChannel;
use crate::error::{CozyError, Result};
use crate::protocol::{
    Attribute, CommandType, POWER_OFF, POWER_ON, Payload, Response, StatusMap,
};
use crate::products::TypeCode;
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

struct DeviceState {
    addr: IpAddr,
    status: StatusMap,
}

/// A discovered device with its cached status.
///
/// State changes are never applied optimistically: the snapshot only moves
/// when the device confirms them in a response or status report.
#[derive(Clone)]
pub struct Device {
    mac: String,
    name: String,
    kind: TypeCode,
    channel: CommandChannel,
    state: Arc<RwLock<DeviceState>>,
    // Single in-flight command slot. Overlapping query/set calls are
    // serialized so responses merge in issuance order.
    inflight: Arc<Mutex<()>>,
    cancel_token: CancellationToken,
}

impl Device {
    pub fn new(mac: &str, name: &str, kind: TypeCode, addr: IpAddr, channel: CommandChannel) -> Self {
        Self {
            mac: mac.to_string(),
            name: name.to_string(),
            kind,
            channel,
            state: Arc::new(RwLock::new(DeviceState {
                addr,
                status: StatusMap::new(),
            })),
            inflight: Arc::new(Mutex::new(())),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeCode {
        self.kind
    }

    pub fn addr(&self) -> IpAddr {
        self.with_state(|s| s.addr)
    }

    /// Update the command endpoint; the registry applies the most recent
    /// announcement's address here (last-write-wins per mac).
    pub fn set_addr(&self, addr: IpAddr) {
        self.with_state_mut(|s| s.addr = addr);
    }

    /// Log label, `name -- ip`.
    pub fn label(&self) -> String {
        format!("{} -- {}", self.name, self.addr())
    }

    /// A copy of the current status snapshot.
    pub fn status(&self) -> StatusMap {
        self.with_state(|s| s.status.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.state.read().expect("Device state lock poisoned"))
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.write().expect("Device state lock poisoned"))
    }

    /// Shallow additive merge: keys absent from the patch are preserved,
    /// last writer wins per key.
    fn merge(&self, patch: &StatusMap) {
        info!("[{}] status update: {:?}", self.label(), patch);
        self.with_state_mut(|s| {
            for (key, value) in patch {
                s.status.insert(key.clone(), value.clone());
            }
        });
    }

    /// Query all attributes and merge the reply into the snapshot.
    pub async fn query(&self) -> Result<()> {
        let _slot = self.inflight.lock().await;
        let addr = self.addr();
        let response = self.channel.send(addr, Payload::query_all()).await?;
        if !response.is_success() {
            return Err(CozyError::ProtocolResponse(response.res));
        }
        self.merge(&response.data);
        Ok(())
    }

    /// Write a patch of attribute values to the device.
    ///
    /// The snapshot is only updated from the device's confirmation; a
    /// non-zero response code leaves it untouched.
    pub async fn set(&self, patch: StatusMap) -> Result<()> {
        debug!("[{}] set {:?}", self.label(), patch);
        let _slot = self.inflight.lock().await;
        let addr = self.addr();
        let response = self.channel.send(addr, Payload::set_from(patch)).await?;
        if !response.is_success() {
            error!("[{}] set error response: {:?}", self.label(), response);
            return Err(CozyError::ProtocolResponse(response.res));
        }
        match response.cmd {
            CommandType::Set | CommandType::StatusReport => self.merge(&response.data),
            _ => warn!("[{}] unhandled response: {:?}", self.label(), response),
        }
        Ok(())
    }

    /// Feed an unsolicited status report through the same merge path as a
    /// SET confirmation.
    ///
    /// This is the embedding host's delivery hook. The engine itself never
    /// routes reports here: the command channel reads exactly one response
    /// per exchange, and the discovery socket drops everything but INFO
    /// datagrams. A host that runs its own listener on the command port
    /// (devices push state changes to whoever is connected) calls this to
    /// keep the snapshot current between polls.
    pub fn apply_report(&self, response: &Response) {
        if response.is_success()
            && matches!(response.cmd, CommandType::Set | CommandType::StatusReport)
        {
            self.merge(&response.data);
        } else {
            warn!("[{}] ignoring report: {:?}", self.label(), response);
        }
    }

    /// One immediate query, then repeat on `poll_interval` until stopped.
    ///
    /// A zero interval polls once only. Ticks are unconditional; a failed
    /// poll is logged and the next tick runs regardless.
    pub fn start(&self, poll_interval: Duration) {
        let device = self.clone();
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = device.query().await {
                error!("[{}] get device status error: {}", device.label(), e);
            }
            if poll_interval.is_zero() {
                return;
            }
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = device.query().await {
                            error!("[{}] get device status error: {}", device.label(), e);
                        }
                    }
                }
            }
            debug!("[{}] poll loop stopped", device.label());
        });
    }

    /// Cancel the poll loop. An in-flight call completes or times out on its
    /// own; it cannot resurrect cancelled state.
    pub fn stop(&self) {
        info!("[{}] stopping device", self.label());
        self.cancel_token.cancel();
    }
}

// -------------------------------------------------------------------------
// Typed attribute accessors
// -------------------------------------------------------------------------
impl Device {
    /// Cached value for one attribute.
    pub fn value(&self, attribute: Attribute) -> Option<Value> {
        self.with_state(|s| s.status.get(attribute.key()).cloned())
    }

    fn int_value(&self, attribute: Attribute) -> Option<i64> {
        self.value(attribute).and_then(|v| v.as_i64())
    }

    /// Write one attribute on the device.
    pub async fn set_value(&self, attribute: Attribute, value: Value) -> Result<()> {
        self.set(StatusMap::from([(attribute.key().to_string(), value)]))
            .await
    }

    /// Cached power state; `None` until the first status arrives.
    pub fn power(&self) -> Option<bool> {
        self.int_value(Attribute::Power).map(|v| v == POWER_ON)
    }

    /// Switch the device on or off. A no-op when the cached state already
    /// matches the requested value.
    pub async fn set_power(&self, on: bool) -> Result<()> {
        if self.power() == Some(on) {
            return Ok(());
        }
        let value = if on { POWER_ON } else { POWER_OFF };
        self.set_value(Attribute::Power, json!(value)).await
    }

    pub fn mode(&self) -> Option<i64> {
        self.int_value(Attribute::Mode)
    }

    pub fn temperature(&self) -> Option<i64> {
        self.int_value(Attribute::Temperature)
    }

    pub fn brightness(&self) -> Option<i64> {
        self.int_value(Attribute::Brightness)
    }

    pub fn hue(&self) -> Option<i64> {
        self.int_value(Attribute::Hue)
    }

    pub fn saturation(&self) -> Option<i64> {
        self.int_value(Attribute::Saturation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn test_device(port: u16) -> Device {
        Device::new(
            "aa:bb:cc",
            "test",
            TypeCode::Light,
            LOCALHOST,
            CommandChannel::new()
                .with_port(port)
                .with_timeout(Duration::from_millis(500)),
        )
    }

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

    #[test]
    fn merge_is_shallow_and_additive() {
        let device = test_device(1);
        device.merge(&StatusMap::from([
            ("1".to_string(), json!(255)),
            ("4".to_string(), json!(50)),
        ]));
        device.merge(&StatusMap::from([("4".to_string(), json!(80))]));

        let status = device.status();
        assert_eq!(status.get("1"), Some(&json!(255)));
        assert_eq!(status.get("4"), Some(&json!(80)));
        assert_eq!(device.power(), Some(true));
        assert_eq!(device.brightness(), Some(80));
    }

    #[tokio::test]
    async fn query_merges_reply_into_snapshot() {
        let port = one_shot_device(Response {
            res: 0,
            cmd: CommandType::Query,
            data: StatusMap::from([("1".to_string(), json!(255))]),
        })
        .await;
        let device = test_device(port);
        device.query().await.unwrap();
        assert_eq!(device.status().get("1"), Some(&json!(255)));
    }

    #[tokio::test]
    async fn failed_set_leaves_snapshot_unchanged() {
        let port = one_shot_device(Response {
            res: 5,
            cmd: CommandType::Set,
            data: StatusMap::from([("1".to_string(), json!(0))]),
        })
        .await;
        let device = test_device(port);
        device.merge(&StatusMap::from([("1".to_string(), json!(255))]));

        let err = device.set_power(false).await;
        assert!(matches!(err, Err(CozyError::ProtocolResponse(5))));
        assert_eq!(device.status().get("1"), Some(&json!(255)));
    }

    #[tokio::test]
    async fn confirmed_set_merges_reported_data() {
        let port = one_shot_device(Response {
            res: 0,
            cmd: CommandType::StatusReport,
            data: StatusMap::from([("1".to_string(), json!(255))]),
        })
        .await;
        let device = test_device(port);
        device.set_power(true).await.unwrap();
        assert_eq!(device.power(), Some(true));
    }

    #[tokio::test]
    async fn set_power_skips_wire_call_when_cached() {
        // Nothing listens on this port; a wire call would fail.
        let device = test_device(1);
        device.merge(&StatusMap::from([("1".to_string(), json!(255))]));
        device.set_power(true).await.unwrap();
    }

    #[test]
    fn unsolicited_report_feeds_merge_path() {
        let device = test_device(1);
        device.apply_report(&Response {
            res: 0,
            cmd: CommandType::StatusReport,
            data: StatusMap::from([("4".to_string(), json!(42))]),
        });
        assert_eq!(device.brightness(), Some(42));

        // failed report is ignored
        device.apply_report(&Response {
            res: 1,
            cmd: CommandType::StatusReport,
            data: StatusMap::from([("4".to_string(), json!(99))]),
        });
        assert_eq!(device.brightness(), Some(42));
    }
}
