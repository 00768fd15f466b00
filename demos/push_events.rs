//! Example: Run the realtime event server and print classified events.
//!
//! Point the panel's remote/realtime reporting at this host on port 5001.

use dmp_lan_bridge::{EventListener, ListenerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let listener = EventListener::new(ListenerConfig::default());
    listener.register_callback(|line| println!("raw: {}", line));
    let mut events = listener.subscribe();

    let addr = listener.start().await?;
    println!("Listening for panel events on {} (Ctrl+C to stop)...\n", addr);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let category = event
                            .category
                            .map(|c| c.description())
                            .unwrap_or("unknown category");
                        let code = event
                            .code
                            .map(|c| c.description())
                            .unwrap_or("unknown event");
                        println!("[{}] {}: {}", event.account, category, code);
                        if let Some(zone) = &event.zone {
                            println!("  zone {} {}", zone, event.zone_name.as_deref().unwrap_or(""));
                        }
                        if let Some(area) = &event.area {
                            println!("  area {} {}", area, event.area_name.as_deref().unwrap_or(""));
                        }
                        if let Some(text) = event.system_text {
                            println!("  {}", text);
                        }
                    }
                    Err(e) => {
                        println!("Event channel error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    listener.stop().await;
    Ok(())
}
