//! Node roles: the central and its peripherals

mod central;
mod peripheral;

pub use central::{CentralNode, PollResult, SettingsCollection};
pub use peripheral::PeripheralNode;

use crate::relay::EventSource;
use crate::settings::ActivitySettings;

/// Events emitted by a running node, consumed by the embedding UI.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A peripheral completed the join handshake (central only)
    PeripheralJoined { index: u8, name: String },
    /// A peripheral link dropped (central only)
    PeripheralLost { index: u8 },
    /// A relayed settings change was applied locally
    SettingsApplied {
        settings: ActivitySettings,
        source: EventSource,
    },
    /// A local settings change was relayed to the other role
    SettingsRelayed { settings: ActivitySettings },
    /// The link to the central dropped (peripheral only)
    CentralLost,
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::protocol::constants::MAX_PERIPHERALS;
    use crate::rpc::{ControlClient, ControlFrame, Request, Response};
    use crate::transport::framing::{read_frame, write_frame};
    use crate::{Config, Error};

    fn settings(idle_ms: u32, sleep_ms: u32) -> ActivitySettings {
        ActivitySettings { idle_ms, sleep_ms }
    }

    fn test_config(initial: ActivitySettings) -> Config {
        Config {
            port: 0,
            control_port: 0,
            collect_window: Duration::from_millis(100),
            initial_settings: initial,
        }
    }

    async fn start_central(initial: ActivitySettings) -> (CentralNode, mpsc::Receiver<NodeEvent>) {
        let mut central = CentralNode::with_config("central".to_string(), test_config(initial));
        let events = central.start().await.expect("central start");
        (central, events)
    }

    async fn attach_peripheral(
        name: &str,
        initial: ActivitySettings,
        port: u16,
    ) -> (PeripheralNode, mpsc::Receiver<NodeEvent>) {
        let mut peripheral = PeripheralNode::with_config(name.to_string(), test_config(initial));
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let events = peripheral.connect(addr).await.expect("peripheral connect");
        (peripheral, events)
    }

    async fn wait_applied(
        events: &mut mpsc::Receiver<NodeEvent>,
    ) -> (ActivitySettings, EventSource) {
        loop {
            match timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(NodeEvent::SettingsApplied { settings, source })) => {
                    return (settings, source)
                }
                Ok(Some(_)) => continue,
                _ => panic!("timed out waiting for a settings apply"),
            }
        }
    }

    #[tokio::test]
    async fn test_set_on_central_reaches_peripheral() {
        let initial = settings(10_000, 300_000);
        let (central, _central_events) = start_central(initial).await;
        let (peripheral, mut peripheral_events) =
            attach_peripheral("left", initial, central.port().unwrap()).await;

        central
            .set_settings(settings(30_000, 900_000))
            .await
            .unwrap();

        let (applied, source) = wait_applied(&mut peripheral_events).await;
        assert_eq!(applied, settings(30_000, 900_000));
        assert_eq!(source, EventSource::Central);
        assert_eq!(peripheral.settings().await, settings(30_000, 900_000));
    }

    #[tokio::test]
    async fn test_peripheral_change_arrives_with_rewritten_source() {
        let initial = settings(10_000, 300_000);
        let (central, mut central_events) = start_central(initial).await;
        let (peripheral, _peripheral_events) =
            attach_peripheral("left", initial, central.port().unwrap()).await;

        peripheral
            .set_settings(settings(45_000, 1_200_000))
            .await
            .unwrap();

        let (applied, source) = wait_applied(&mut central_events).await;
        assert_eq!(applied, settings(45_000, 1_200_000));
        assert_eq!(source, EventSource::Peripheral(peripheral.index().unwrap()));
        assert_eq!(central.settings().await, settings(45_000, 1_200_000));
    }

    #[tokio::test]
    async fn test_no_self_loop_on_central_change() {
        let initial = settings(10_000, 300_000);
        let (central, mut central_events) = start_central(initial).await;
        let (_peripheral, mut peripheral_events) =
            attach_peripheral("left", initial, central.port().unwrap()).await;

        central
            .set_settings(settings(20_000, 600_000))
            .await
            .unwrap();
        wait_applied(&mut peripheral_events).await;

        // Give a would-be echo time to come back, then check the central
        // never re-applied its own change.
        sleep(Duration::from_millis(200)).await;
        while let Ok(event) = central_events.try_recv() {
            assert!(
                !matches!(event, NodeEvent::SettingsApplied { .. }),
                "central re-applied its own change: {:?}",
                event
            );
        }
        assert_eq!(central.settings().await, settings(20_000, 600_000));
    }

    #[tokio::test]
    async fn test_poll_verdict_in_sync() {
        let initial = settings(500, 1_800_000);
        let (central, _central_events) = start_central(initial).await;
        let (_p1, _e1) = attach_peripheral("left", initial, central.port().unwrap()).await;
        let (_p2, _e2) = attach_peripheral("right", initial, central.port().unwrap()).await;

        let result = central.poll_all().await.unwrap();
        assert_eq!(result.entries.len(), 3);
        assert!(result.in_sync);
        assert_eq!(result.entries[0].source, EventSource::Central);
    }

    #[tokio::test]
    async fn test_poll_verdict_divergent() {
        let initial = settings(500, 1_800_000);
        let (central, _central_events) = start_central(initial).await;
        let (p1, _e1) = attach_peripheral("left", initial, central.port().unwrap()).await;
        let (_p2, _e2) = attach_peripheral("right", initial, central.port().unwrap()).await;

        // Diverge one peripheral through the silent apply path so the
        // change is not relayed back to the central.
        let index = p1.index().unwrap();
        p1.store.apply(settings(100, 1_800_000)).await;

        let result = central.poll_all().await.unwrap();
        assert_eq!(result.entries.len(), 3);
        assert!(!result.in_sync);

        let divergent = result
            .entries
            .iter()
            .find(|e| e.settings.idle_ms == 100)
            .expect("divergent entry retained");
        assert_eq!(divergent.source, EventSource::Peripheral(index));
    }

    #[tokio::test]
    async fn test_overlapping_poll_rejected() {
        let initial = settings(500, 1_800_000);
        let (central, _central_events) = start_central(initial).await;

        let (first, second) = tokio::join!(central.poll_all(), central.poll_all());
        let successes = [first.is_ok(), second.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(successes, 1);
        for result in [first, second] {
            if let Err(e) = result {
                assert!(matches!(e, Error::PollInProgress));
            }
        }
    }

    #[tokio::test]
    async fn test_get_all_via_control_surface() {
        let initial = settings(500, 1_800_000);
        let (central, _central_events) = start_central(initial).await;
        let (_p1, _e1) = attach_peripheral("left", initial, central.port().unwrap()).await;

        let addr: SocketAddr = ([127, 0, 0, 1], central.control_port().unwrap()).into();
        let mut client = ControlClient::connect(addr).await.unwrap();

        match client.call(&Request::GetAllActivitySettings).await.unwrap() {
            Response::AllActivitySettings { entries, in_sync } => {
                assert_eq!(entries.len(), 2);
                assert!(in_sync);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fanout_notifies_every_node() {
        let initial = settings(500, 1_800_000);
        let (central, _central_events) = start_central(initial).await;
        let (_p1, _e1) = attach_peripheral("left", initial, central.port().unwrap()).await;
        let (_p2, _e2) = attach_peripheral("right", initial, central.port().unwrap()).await;

        let addr: SocketAddr = ([127, 0, 0, 1], central.control_port().unwrap()).into();
        let mut client = ControlClient::connect(addr).await.unwrap();

        match client
            .call(&Request::RefreshAllActivitySettings)
            .await
            .unwrap()
        {
            Response::RefreshStarted { request_sent } => assert!(request_sent),
            other => panic!("unexpected response: {:?}", other),
        }

        let mut sources = Vec::new();
        for _ in 0..3 {
            let notification = timeout(Duration::from_secs(2), client.recv_notification())
                .await
                .expect("notification timed out")
                .unwrap();
            assert_eq!(notification.settings, initial);
            sources.push(notification.source);
        }
        assert!(sources.contains(&EventSource::Central));
        assert!(sources.contains(&EventSource::Peripheral(1)));
        assert!(sources.contains(&EventSource::Peripheral(2)));
    }

    #[tokio::test]
    async fn test_set_and_get_through_control_surface() {
        let initial = settings(10_000, 300_000);
        let (central, _central_events) = start_central(initial).await;
        let (peripheral, mut peripheral_events) =
            attach_peripheral("left", initial, central.port().unwrap()).await;

        let central_addr: SocketAddr = ([127, 0, 0, 1], central.control_port().unwrap()).into();
        let mut central_client = ControlClient::connect(central_addr).await.unwrap();

        match central_client
            .call(&Request::SetActivitySettings {
                settings: settings(30_000, 900_000),
            })
            .await
            .unwrap()
        {
            Response::SetResult { success } => assert!(success),
            other => panic!("unexpected response: {:?}", other),
        }

        wait_applied(&mut peripheral_events).await;

        let peripheral_addr: SocketAddr =
            ([127, 0, 0, 1], peripheral.control_port().unwrap()).into();
        let mut peripheral_client = ControlClient::connect(peripheral_addr).await.unwrap();

        match peripheral_client
            .call(&Request::GetActivitySettings)
            .await
            .unwrap()
        {
            Response::ActivitySettings { settings: current } => {
                assert_eq!(current, settings(30_000, 900_000));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_central_only_requests_rejected_on_peripheral() {
        let initial = settings(10_000, 300_000);
        let (central, _central_events) = start_central(initial).await;
        let (peripheral, _peripheral_events) =
            attach_peripheral("left", initial, central.port().unwrap()).await;

        let addr: SocketAddr = ([127, 0, 0, 1], peripheral.control_port().unwrap()).into();
        let mut client = ControlClient::connect(addr).await.unwrap();

        match client.call(&Request::GetAllActivitySettings).await.unwrap() {
            Response::Error { message } => assert!(message.contains("not supported")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_control_request_gets_error_response() {
        let initial = settings(10_000, 300_000);
        let (central, _central_events) = start_central(initial).await;

        let addr: SocketAddr = ([127, 0, 0, 1], central.control_port().unwrap()).into();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut read_half, mut write_half) = stream.into_split();

        write_frame(&mut write_half, b"not json").await.unwrap();

        let payload = timeout(Duration::from_secs(2), read_frame(&mut read_half))
            .await
            .expect("response timed out")
            .unwrap();
        match serde_json::from_slice::<ControlFrame>(&payload).unwrap() {
            ControlFrame::Response(Response::Error { message }) => {
                assert!(message.contains("decode"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_assigns_indices_and_bounds_slots() {
        let initial = settings(1_000, 2_000);
        let (central, _central_events) = start_central(initial).await;

        let mut peripherals = Vec::new();
        for i in 0..MAX_PERIPHERALS {
            let (peripheral, events) =
                attach_peripheral(&format!("p{}", i), initial, central.port().unwrap()).await;
            assert_eq!(peripheral.index(), Some(i as u8 + 1));
            peripherals.push((peripheral, events));
        }

        let mut overflow =
            PeripheralNode::with_config("overflow".to_string(), test_config(initial));
        let addr: SocketAddr = ([127, 0, 0, 1], central.port().unwrap()).into();
        match overflow.connect(addr).await {
            Err(Error::JoinRejected(_)) => {}
            Err(other) => panic!("expected join rejection, got {:?}", other),
            Ok(_) => panic!("expected join rejection, got a welcome"),
        }
    }
}
