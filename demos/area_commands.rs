//! Example: Arm and disarm areas, bypass a zone and pulse an output.

use dmp_lan_bridge::{
    ArmOptions, ConnectionRegistry, DmpError, DmpPanel, OutputMode, PanelConfig,
};
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .host("192.168.0.100")
        .account("12345")
        .remote_key("SECRET")
        .build();

    let panel = DmpPanel::connect(config, ConnectionRegistry::new()).await?;
    panel.start_keepalive(Duration::from_secs(10));

    println!("Bypassing zone 4...");
    panel.bypass_zone(4).await?;

    println!("Arming area 1 (bypass faulted zones)...");
    let options = ArmOptions {
        bypass_faulted: true,
        ..Default::default()
    };
    match panel.arm_areas(&[1], options).await {
        Ok(()) => println!("Armed"),
        Err(DmpError::Rejected { command }) => println!("Panel refused {}", command),
        Err(e) => return Err(e.into()),
    }

    sleep(Duration::from_secs(5)).await;
    let status = panel.update_status().await?;
    if let Some(area) = status.area("1") {
        println!("Area 1 is now {:?}", area.state);
    }

    println!("Disarming area 1...");
    panel.disarm_areas(&[1]).await?;
    panel.restore_zone(4).await?;

    println!("Pulsing output 1...");
    panel.set_output(1, OutputMode::Pulse).await?;

    panel.disconnect().await;
    Ok(())
}
