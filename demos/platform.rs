/**
 * Platform Example
 *
 * The full startup flow: fetch the product type table, start discovery,
 * and feed every announcement into the registry, which classifies devices
 * and begins polling their status.
 */
use cozylocal::registry::{Platform, Registry};
use cozylocal::{Device, PlatformConfig, ProductTable, Scanner};
use std::sync::Arc;
use tokio::time::{Duration, sleep};

struct PrintPlatform;

impl Platform for PrintPlatform {
    fn device_discovered(&self, device: &Device) {
        println!("[PLATFORM] accessory registered: {}", device.label());
    }
    fn device_removed(&self, device: &Device) {
        println!("[PLATFORM] accessory removed: {}", device.label());
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- Cozylocal - Platform ---");

    let config = PlatformConfig::default();

    // Best effort; an empty table classifies everything as a switch.
    let products = ProductTable::fetch(&config.language).await;
    if products.is_empty() {
        println!("[INFO] Product type table unavailable, defaulting to switch");
    }

    let registry = Arc::new(Registry::new(config.clone(), products, Arc::new(PrintPlatform)));

    let mut discovery = match Scanner::new()
        .with_bind("0.0.0.0", config.port)
        .with_interval(config.scan_interval())
        .with_scan_count(config.scan_count)
        .start()
        .await
    {
        Ok(discovery) => discovery,
        Err(e) => {
            eprintln!("[ERROR] Discovery failed to start: {}", e);
            return;
        }
    };

    let announcements = registry.clone();
    tokio::spawn(async move {
        while let Some(announcement) = discovery.next().await {
            announcements.register(&announcement);
        }
    });

    // Let discovery and the first status polls run for a while.
    sleep(Duration::from_secs(30)).await;

    println!("[INFO] {} devices registered", registry.len());
    registry.shutdown();
}
