//! Device registry and classification.
//! Deduplicates announcements by mac, resolves device types and drives
//! the host platform's accessory lifecycle.

use crate::channel::CommandChannel;
use crate::config::PlatformConfig;
use crate::device::Device;
use crate::products::ProductTable;
use crate::scanner::Announcement;
use log::{debug, info};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Host platform collaborator, notified when accessories appear or go away.
/// The registry never inspects what the platform does with the handle.
pub trait Platform: Send + Sync {
    fn device_discovered(&self, _device: &Device) {}
    fn device_removed(&self, _device: &Device) {}
}

/// Platform stub for headless deployments.
pub struct NullPlatform;

impl Platform for NullPlatform {}

struct DeviceRecord {
    device: Device,
    initialized: bool,
}

/// Tracks every known device by mac.
///
/// The map is mutated only under its mutex; at most one live controller
/// exists per mac at any time.
pub struct Registry {
    config: PlatformConfig,
    products: ProductTable,
    channel: CommandChannel,
    platform: Arc<dyn Platform>,
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl Registry {
    pub fn new(config: PlatformConfig, products: ProductTable, platform: Arc<dyn Platform>) -> Self {
        Self {
            config,
            products,
            channel: CommandChannel::new(),
            platform,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Override the command channel used for new device controllers.
    pub fn with_channel(mut self, channel: CommandChannel) -> Self {
        self.channel = channel;
        self
    }

    fn with_devices<R>(&self, f: impl FnOnce(&mut HashMap<String, DeviceRecord>) -> R) -> R {
        f(&mut self.devices.lock().expect("Registry lock poisoned"))
    }

    /// Pre-populate a record for an accessory the host platform restored
    /// from its cache. The device is not polled until its first
    /// announcement arrives.
    pub fn restore(&self, mac: &str, addr: IpAddr, pid: Option<&str>) {
        let kind = pid.map(|p| self.products.classify(p)).unwrap_or_default();
        let name = self.config.display_name(mac);
        let device = Device::new(mac, &name, kind, addr, self.channel.clone());
        info!("Loading device from cache: {}", device.label());
        self.with_devices(|devices| {
            devices.entry(mac.to_string()).or_insert(DeviceRecord {
                device,
                initialized: false,
            });
        });
    }

    /// Process one discovery announcement.
    ///
    /// Disabled devices are removed (with exactly one removal signal) or
    /// skipped; new devices are classified and announced to the platform;
    /// re-announcements of an initialized device only refresh its endpoint.
    pub fn register(&self, announcement: &Announcement) {
        let mac = announcement.mac.as_str();
        let disabled = self
            .config
            .device(mac)
            .map(|entry| entry.disabled)
            .unwrap_or(false);

        if disabled {
            info!("accessory {} skipped", mac);
            if let Some(record) = self.with_devices(|devices| devices.remove(mac)) {
                record.device.stop();
                self.platform.device_removed(&record.device);
            }
            return;
        }

        // Lookup, classification and insert happen under one lock so that
        // concurrent announcements for the same mac elect exactly one
        // controller. Platform signals and the poll loop start only after
        // the map has settled.
        let outcome = self.with_devices(|devices| match devices.get_mut(mac) {
            Some(record) => {
                // Endpoint follows the most recent announcement.
                record.device.set_addr(announcement.addr);
                if record.initialized {
                    None
                } else {
                    record.initialized = true;
                    Some((record.device.clone(), false))
                }
            }
            None => {
                let kind = announcement
                    .pid
                    .as_deref()
                    .map(|pid| self.products.classify(pid))
                    .unwrap_or_default();
                let name = self.config.display_name(mac);
                let device = Device::new(mac, &name, kind, announcement.addr, self.channel.clone());
                devices.insert(
                    mac.to_string(),
                    DeviceRecord {
                        device: device.clone(),
                        initialized: true,
                    },
                );
                Some((device, true))
            }
        });

        let (device, created) = match outcome {
            Some(outcome) => outcome,
            None => {
                debug!("accessory {} already initialized", mac);
                return;
            }
        };

        if created {
            info!(
                "Initializing new accessory {} ({:?}) at {}",
                mac,
                device.kind(),
                announcement.addr
            );
            self.platform.device_discovered(&device);
        }

        device.start(self.config.check_status_interval());
    }

    /// Remove a device, stopping its poll loop and signalling the platform.
    pub fn remove(&self, mac: &str) -> bool {
        match self.with_devices(|devices| devices.remove(mac)) {
            Some(record) => {
                record.device.stop();
                self.platform.device_removed(&record.device);
                info!("accessory {} removed", mac);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, mac: &str) -> Option<Device> {
        self.with_devices(|devices| devices.get(mac).map(|record| record.device.clone()))
    }

    pub fn len(&self) -> usize {
        self.with_devices(|devices| devices.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every device controller and clear the map.
    pub fn shutdown(&self) {
        self.with_devices(|devices| {
            for (_, record) in devices.drain() {
                record.device.stop();
            }
        });
    }
}
