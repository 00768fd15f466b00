//! Example: Connect to a DMP panel and print area and zone status.

use dmp_lan_bridge::{ConnectionRegistry, DmpPanel, PanelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .host("192.168.0.100")
        .account("12345")
        .remote_key("SECRET")
        .build();

    println!("Connecting to panel...");
    let panel = DmpPanel::connect(config, ConnectionRegistry::new()).await?;

    let status = panel.status().await;

    println!("\n--- Areas ({}) ---", status.areas.len());
    for area in status.areas.values() {
        println!(
            "  Area {:>3}: {:20} state={:?} armed={}",
            area.number,
            area.name,
            area.state,
            area.state.is_armed(),
        );
    }

    println!("\n--- Zones ({}) ---", status.zones.len());
    for zone in status.zones.values() {
        println!(
            "  Zone {}: {:20} state={:?} faulted={}",
            zone.number,
            zone.name,
            zone.state,
            zone.state.is_faulted(),
        );
    }

    panel.disconnect().await;
    Ok(())
}
