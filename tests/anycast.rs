use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use convoke::test_utils::{EchoHandler, LocalChannel, LocalSwitch};
use convoke::{Address, Dispatcher, DispatcherBuilder, RequestOptions, ResponseMode};

fn payload() -> Bytes {
    Bytes::from_static(b"task")
}

async fn cluster() -> (
    Arc<LocalSwitch>,
    Vec<Address>,
    Arc<LocalChannel>,
    Arc<Dispatcher>,
) {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let members: Vec<Address> = ["a", "b", "c"]
        .iter()
        .map(|name| Address::from(*name))
        .collect();

    let channel_a = switch.attach(members[0].clone());
    let node_a = DispatcherBuilder::new(channel_a.clone())
        .with_request_handler(EchoHandler)
        .build();
    for member in &members[1..] {
        DispatcherBuilder::new(switch.attach(member.clone()))
            .with_request_handler(EchoHandler)
            .build();
    }
    switch.install_view(&members).await;

    (switch, members, channel_a, node_a)
}

#[tokio::test]
async fn test_anycast_fans_out_one_unicast_per_destination() {
    let (_switch, members, channel_a, node_a) = cluster().await;
    let subset = [members[1].clone(), members[2].clone()];
    let sends_before = channel_a.messages_sent();

    let rsps = node_a
        .cast_message(
            Some(&subset),
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(5))
                .with_anycasting(true),
        )
        .await
        .unwrap();

    assert_eq!(channel_a.messages_sent() - sends_before, 2);
    assert_eq!(rsps.len(), 2);
    assert_eq!(rsps.num_received(), 2);
    assert_eq!(node_a.stats().anycasts(true), 1);
    assert_eq!(node_a.stats().multicasts(true), 0);
}

#[tokio::test]
async fn test_anycast_addresses_send_a_single_message() {
    let (_switch, members, channel_a, node_a) = cluster().await;
    let subset = [members[1].clone(), members[2].clone()];
    let sends_before = channel_a.messages_sent();

    let rsps = node_a
        .cast_message(
            Some(&subset),
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(5))
                .with_anycasting(true)
                .with_anycast_addresses(true),
        )
        .await
        .unwrap();

    // one message carries the whole destination list
    assert_eq!(channel_a.messages_sent() - sends_before, 1);
    assert_eq!(rsps.len(), 2);
    assert_eq!(rsps.num_received(), 2);
    for member in &subset {
        assert_eq!(rsps.get(member).unwrap().value().value(), Some(&payload()));
    }
}

#[tokio::test]
async fn test_async_anycast_counts_separately() {
    let (_switch, members, _channel_a, node_a) = cluster().await;
    let subset = [members[1].clone()];

    node_a
        .cast_message(
            Some(&subset),
            payload(),
            RequestOptions::fire_and_forget().with_anycasting(true),
        )
        .await
        .unwrap();

    assert_eq!(node_a.stats().anycasts(false), 1);
    assert_eq!(node_a.stats().anycasts(true), 0);
    assert_eq!(node_a.outstanding_requests(), 0);
}
