/**
 * Discovery Example
 *
 * Broadcasts scan requests on the local network and prints every device
 * announcement as it arrives on the discovery stream.
 */
use cozylocal::Scanner;
use futures_util::StreamExt;
use tokio::time::{Duration, timeout};

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- Cozylocal - Discovery ---");
    println!("[INFO] Scanning the network for CozyLife devices...");

    let scanner = Scanner::new()
        .with_interval(Duration::from_secs(3))
        .with_scan_count(5);

    let discovery = match scanner.start().await {
        Ok(discovery) => discovery,
        Err(e) => {
            eprintln!("[ERROR] Discovery failed to start: {}", e);
            return;
        }
    };

    let stream = discovery.into_stream();
    tokio::pin!(stream);

    let mut count = 0;
    while let Ok(Some(announcement)) = timeout(Duration::from_secs(10), stream.next()).await {
        count += 1;
        println!(
            "[{}] Found Device: mac={}, pid={:?}, endpoint={}:{}",
            count,
            announcement.mac,
            announcement.pid,
            announcement.addr,
            announcement.port
        );
    }

    println!("[INFO] Scan finished. Total devices found: {count}");
}
