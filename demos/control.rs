/**
 * Device Control Example
 *
 * Queries a device's status, toggles its power, then reads the cached
 * snapshot back through the typed accessors.
 */
use cozylocal::{CommandChannel, Device, TypeCode};
use std::net::IpAddr;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- Cozylocal - Device Control ---");

    // 1. Point at a device found by discovery (see demos/discover.rs)
    let addr: IpAddr = "192.168.1.50".parse().unwrap();
    let device = Device::new(
        "aa:bb:cc:dd:ee:ff",
        "desk lamp",
        TypeCode::Light,
        addr,
        CommandChannel::new(),
    );

    // 2. Query all attributes
    println!("[STEP 1] Querying status...");
    match device.query().await {
        Ok(()) => println!("[SUCCESS] Status: {:?}", device.status()),
        Err(e) => {
            eprintln!("[ERROR] Query failed: {}", e);
            return;
        }
    }

    // 3. Toggle power
    let target = !device.power().unwrap_or(false);
    println!("[STEP 2] Switching power {}...", if target { "ON" } else { "OFF" });
    match device.set_power(target).await {
        Ok(()) => println!("[SUCCESS] Power is now {:?}", device.power()),
        Err(e) => eprintln!("[ERROR] Control failed: {}", e),
    }

    // 4. Typed accessors over the cached snapshot
    println!(
        "[INFO] brightness={:?} hue={:?} saturation={:?}",
        device.brightness(),
        device.hue(),
        device.saturation()
    );
}
