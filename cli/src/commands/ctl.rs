//! Control-surface client commands.

use std::net::SocketAddr;
use std::time::Duration;

use splitsync_core::rpc::ControlClient;
use splitsync_core::{ActivitySettings, Request, Response};

async fn connect(control_port: u16) -> anyhow::Result<ControlClient> {
    let addr: SocketAddr = ([127, 0, 0, 1], control_port).into();
    Ok(ControlClient::connect(addr).await?)
}

/// Read and print the node's current settings.
pub async fn get(control_port: u16) -> anyhow::Result<()> {
    let mut client = connect(control_port).await?;

    match client.call(&Request::GetActivitySettings).await? {
        Response::ActivitySettings { settings } => {
            println!("idle:  {} ms", settings.idle_ms);
            println!("sleep: {} ms", settings.sleep_ms);
        }
        Response::Error { message } => eprintln!("\x1b[1;31m✗\x1b[0m {}", message),
        other => eprintln!("\x1b[1;31m✗\x1b[0m Unexpected response: {:?}", other),
    }

    Ok(())
}

/// Write settings on the node; the change relays to the other role.
pub async fn set(control_port: u16, idle_ms: u32, sleep_ms: u32) -> anyhow::Result<()> {
    let mut client = connect(control_port).await?;

    let request = Request::SetActivitySettings {
        settings: ActivitySettings { idle_ms, sleep_ms },
    };
    match client.call(&request).await? {
        Response::SetResult { success: true } => {
            println!("\x1b[1;32m✓\x1b[0m Settings updated");
        }
        Response::SetResult { success: false } => {
            eprintln!("\x1b[1;31m✗\x1b[0m Settings rejected");
        }
        Response::Error { message } => eprintln!("\x1b[1;31m✗\x1b[0m {}", message),
        other => eprintln!("\x1b[1;31m✗\x1b[0m Unexpected response: {:?}", other),
    }

    Ok(())
}

/// Poll every node and print the collected entries with a verdict.
pub async fn get_all(control_port: u16) -> anyhow::Result<()> {
    let mut client = connect(control_port).await?;

    match client.call(&Request::GetAllActivitySettings).await? {
        Response::AllActivitySettings { entries, in_sync } => {
            for entry in &entries {
                println!(
                    "{:<14} idle={} ms, sleep={} ms",
                    entry.source.to_string(),
                    entry.settings.idle_ms,
                    entry.settings.sleep_ms
                );
            }
            if in_sync {
                println!(
                    "\n\x1b[1;32m✓\x1b[0m All nodes in sync ({} responding)",
                    entries.len()
                );
            } else {
                println!("\n\x1b[1;31m✗\x1b[0m Settings diverge across nodes");
            }
        }
        Response::Error { message } => eprintln!("\x1b[1;31m✗\x1b[0m {}", message),
        other => eprintln!("\x1b[1;31m✗\x1b[0m Unexpected response: {:?}", other),
    }

    Ok(())
}

/// Trigger a fan-out refresh and print notifications as they arrive.
pub async fn refresh(control_port: u16) -> anyhow::Result<()> {
    let mut client = connect(control_port).await?;

    match client.call(&Request::RefreshAllActivitySettings).await? {
        Response::RefreshStarted { request_sent: true } => {
            println!("\x1b[2mRefresh requested; waiting for notifications...\x1b[0m");
        }
        Response::RefreshStarted { request_sent: false } => {
            eprintln!("\x1b[1;31m✗\x1b[0m Refresh request was not sent");
            return Ok(());
        }
        Response::Error { message } => {
            eprintln!("\x1b[1;31m✗\x1b[0m {}", message);
            return Ok(());
        }
        other => {
            eprintln!("\x1b[1;31m✗\x1b[0m Unexpected response: {:?}", other);
            return Ok(());
        }
    }

    // Nodes report independently; stop after a quiet second.
    loop {
        match tokio::time::timeout(Duration::from_secs(1), client.recv_notification()).await {
            Ok(Ok(notification)) => {
                println!(
                    "{:<14} idle={} ms, sleep={} ms",
                    notification.source.to_string(),
                    notification.settings.idle_ms,
                    notification.settings.sleep_ms
                );
            }
            _ => break,
        }
    }

    Ok(())
}
