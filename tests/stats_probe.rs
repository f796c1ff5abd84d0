use std::sync::Arc;

use bytes::Bytes;
use convoke::test_utils::{EchoHandler, LocalSwitch};
use convoke::{Address, Dispatcher, DispatcherBuilder, ProbeHandler, RequestOptions};

fn payload() -> Bytes {
    Bytes::from_static(b"x")
}

async fn pair() -> (Arc<LocalSwitch>, Address, Arc<Dispatcher>) {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");

    let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(EchoHandler)
        .build();
    switch.install_view(&[a, b.clone()]).await;

    (switch, b, node_a)
}

#[tokio::test]
async fn test_counters_track_each_call_shape() {
    let (_switch, b, node_a) = pair().await;

    node_a
        .send_message(b.clone(), payload(), RequestOptions::sync())
        .await
        .unwrap();
    node_a
        .send_message(b.clone(), payload(), RequestOptions::fire_and_forget())
        .await
        .unwrap();
    node_a
        .cast_message(None, payload(), RequestOptions::sync())
        .await
        .unwrap();
    node_a
        .cast_message(
            Some(&[b.clone()]),
            payload(),
            RequestOptions::sync().with_anycasting(true),
        )
        .await
        .unwrap();

    let stats = node_a.stats();
    assert_eq!(stats.unicasts(true), 1);
    assert_eq!(stats.unicasts(false), 1);
    assert_eq!(stats.multicasts(true), 1);
    assert_eq!(stats.anycasts(true), 1);
}

#[tokio::test]
async fn test_extended_stats_record_per_destination_timings() {
    let (_switch, b, node_a) = pair().await;
    node_a.set_extended_stats(true);

    for _ in 0..3 {
        node_a
            .send_message(b.clone(), payload(), RequestOptions::sync())
            .await
            .unwrap();
    }

    let timings = node_a.stats().timings();
    assert_eq!(timings.len(), 1);
    let timing = timings.get(&b).unwrap();
    assert_eq!(timing.samples(), 3);
    assert!(timing.total() >= timing.average());

    let breakdown = node_a.stats().print_order_by_dest();
    assert!(breakdown.contains("b: 3 sync requests"));
}

#[tokio::test]
async fn test_probe_reports_counters() {
    let (_switch, b, node_a) = pair().await;

    node_a
        .send_message(b, payload(), RequestOptions::sync())
        .await
        .unwrap();

    let probe = node_a.probe_handler();
    let out = probe.handle_probe(&["rpcs"]);
    assert_eq!(out.len(), 6);
    let sync_unicasts = out
        .iter()
        .find(|(key, _)| key == "sync unicast rpcs")
        .unwrap();
    assert_eq!(sync_unicasts.1, "1");

    probe.handle_probe(&["rpcs-reset"]);
    let out = probe.handle_probe(&["rpcs"]);
    assert!(out.iter().all(|(_, value)| value == "0"));
}

#[tokio::test]
async fn test_probe_toggles_details() {
    let (_switch, b, node_a) = pair().await;
    let probe = node_a.probe_handler();

    let out = probe.handle_probe(&["rpcs-details"]);
    assert_eq!(
        out[0].1,
        "<details not enabled: use rpcs-enable-details to enable>"
    );

    probe.handle_probe(&["rpcs-enable-details"]);
    assert!(node_a.extended_stats());

    node_a
        .send_message(b, payload(), RequestOptions::sync())
        .await
        .unwrap();
    let out = probe.handle_probe(&["rpcs-details"]);
    assert!(out[0].1.contains("b:"));

    probe.handle_probe(&["rpcs-disable-details"]);
    assert!(!node_a.extended_stats());
}
