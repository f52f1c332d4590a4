//! Run commands for the central and peripheral roles.

use std::net::SocketAddr;

use splitsync_core::{CentralNode, Config, NodeEvent, PeripheralNode};

use crate::ui::print_banner;

/// Run the central node until interrupted.
pub async fn run_central(node_name: String, port: u16, control_port: u16) -> anyhow::Result<()> {
    print_banner();

    let config = Config {
        port,
        control_port,
        ..Config::default()
    };
    let mut node = CentralNode::with_config(node_name, config);

    println!("\x1b[1mNode:\x1b[0m {}", node.node_name());
    println!("\x1b[1mID:\x1b[0m   {}", node.node_id());
    println!("\x1b[1mRole:\x1b[0m central");

    let mut events = node.start().await?;

    if let (Some(port), Some(control_port)) = (node.port(), node.control_port()) {
        println!(
            "\n\x1b[1;32m✓\x1b[0m Links on port {}, control surface on port {}",
            port, control_port
        );
    }
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    run_event_loop(&mut events).await?;
    node.shutdown();
    Ok(())
}

/// Attach to a central as a peripheral and run until interrupted.
pub async fn run_peripheral(
    node_name: String,
    central: String,
    control_port: u16,
) -> anyhow::Result<()> {
    print_banner();

    let config = Config {
        control_port,
        ..Config::default()
    };
    let mut node = PeripheralNode::with_config(node_name, config);

    println!("\x1b[1mNode:\x1b[0m {}", node.node_name());
    println!("\x1b[1mID:\x1b[0m   {}", node.node_id());
    println!("\x1b[1mRole:\x1b[0m peripheral");

    let addr: SocketAddr = central.parse()?;
    let mut events = node.connect(addr).await?;

    if let Some(index) = node.index() {
        println!(
            "\n\x1b[1;32m✓\x1b[0m Attached to {} as index {}",
            central, index
        );
    }
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    run_event_loop(&mut events).await?;
    node.shutdown();
    Ok(())
}

async fn run_event_loop(events: &mut tokio::sync::mpsc::Receiver<NodeEvent>) -> anyhow::Result<()> {
    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                handle_event(event);
            }
            _ = rx.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a node event and print appropriate output.
fn handle_event(event: NodeEvent) {
    match event {
        NodeEvent::PeripheralJoined { index, name } => {
            println!(
                "\x1b[1;32m⬤\x1b[0m Attached: \x1b[1m{}\x1b[0m (index {})",
                name, index
            );
        }
        NodeEvent::PeripheralLost { index } => {
            println!("\x1b[1;31m⬤\x1b[0m Detached: index {}", index);
        }
        NodeEvent::SettingsApplied { settings, source } => {
            println!(
                "\x1b[1;34m⇊\x1b[0m Applied from {}: idle={} ms, sleep={} ms",
                source, settings.idle_ms, settings.sleep_ms
            );
        }
        NodeEvent::SettingsRelayed { settings } => {
            println!(
                "\x1b[1;34m⇈\x1b[0m Relayed: idle={} ms, sleep={} ms",
                settings.idle_ms, settings.sleep_ms
            );
        }
        NodeEvent::CentralLost => {
            eprintln!("\x1b[1;31m✗\x1b[0m Link to central lost");
        }
    }
}
