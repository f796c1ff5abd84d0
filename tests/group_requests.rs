use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use convoke::test_utils::{EchoHandler, LocalSwitch, SilentHandler};
use convoke::{
    Address,
    Dispatcher,
    DispatcherBuilder,
    RequestOptions,
    ResponseMode,
    RspFilter,
    RspValue,
    TransientFlag,
};

fn payload() -> Bytes {
    Bytes::from_static(&[0x01])
}

/// Builds a cluster where every member echoes requests back.
async fn echo_cluster(
    names: &[&'static str],
) -> (Arc<LocalSwitch>, Vec<Address>, Vec<Arc<Dispatcher>>) {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let members: Vec<Address> = names.iter().map(|name| Address::from(*name)).collect();
    let mut nodes = Vec::new();
    for member in &members {
        nodes.push(
            DispatcherBuilder::new(switch.attach(member.clone()))
                .with_request_handler(EchoHandler)
                .build(),
        );
    }
    switch.install_view(&members).await;
    (switch, members, nodes)
}

#[tokio::test]
async fn test_sync_multicast_all_reply() {
    let (_switch, members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(rsps.len(), 3);
    assert_eq!(rsps.num_received(), 3);
    for member in &members {
        let rsp = rsps.get(member).unwrap();
        assert_eq!(rsp.value().value(), Some(&payload()));
    }

    assert_eq!(nodes[0].stats().multicasts(true), 1);
    assert_eq!(nodes[0].outstanding_requests(), 0);
}

#[tokio::test]
async fn test_majority_completes_without_slow_members() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let members: Vec<Address> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| Address::from(*name))
        .collect();

    let node_a = DispatcherBuilder::new(switch.attach(members[0].clone()))
        .with_request_handler(EchoHandler)
        .build();
    let mut others = Vec::new();
    for member in &members[1..3] {
        others.push(
            DispatcherBuilder::new(switch.attach(member.clone()))
                .with_request_handler(EchoHandler)
                .build(),
        );
    }
    for member in &members[3..] {
        others.push(
            DispatcherBuilder::new(switch.attach(member.clone()))
                .with_request_handler(SilentHandler)
                .build(),
        );
    }
    switch.install_view(&members).await;

    let started_at = Instant::now();
    let rsps = node_a
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetMajority, Duration::from_secs(1)),
        )
        .await
        .unwrap();

    // three responders complete the majority well before the deadline
    assert!(started_at.elapsed() < Duration::from_millis(900));
    assert_eq!(rsps.num_received(), 3);
    assert_eq!(rsps.num_not_received(), 2);
    assert!(rsps.get(&members[3]).unwrap().value() == &RspValue::NotReceived);
}

#[tokio::test]
async fn test_deadline_returns_partial_results() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");
    let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(SilentHandler)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    let started_at = Instant::now();
    let rsps = node_a
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_millis(200)),
        )
        .await
        .unwrap();

    assert!(started_at.elapsed() >= Duration::from_millis(190));
    assert_eq!(rsps.num_received(), 1);
    assert_eq!(rsps.num_not_received(), 1);
    assert_eq!(rsps.get(&b).unwrap().value(), &RspValue::NotReceived);
    assert_eq!(node_a.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_future_variant_observes_the_deadline_too() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");
    let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(SilentHandler)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    let request = node_a
        .cast_message_with_future(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_millis(200)),
        )
        .await
        .unwrap();

    let rsps = request.results().await;
    assert_eq!(rsps.num_received(), 1);
    assert_eq!(rsps.num_not_received(), 1);
}

#[tokio::test]
async fn test_first_mode_completes_on_one_reply() {
    let (_switch, _members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetFirst, Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert!(rsps.num_received() >= 1);
}

#[tokio::test]
async fn test_fire_and_forget_never_waits() {
    let (_switch, _members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(None, payload(), RequestOptions::fire_and_forget())
        .await
        .unwrap();

    assert!(rsps.is_empty());
    assert_eq!(nodes[0].stats().multicasts(false), 1);
    assert_eq!(nodes[0].outstanding_requests(), 0);
}

#[tokio::test]
async fn test_empty_destinations_short_circuit() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let channel = switch.attach(a.clone());
    let node = DispatcherBuilder::new(channel.clone())
        .with_request_handler(EchoHandler)
        .build();
    switch.install_view(&[a.clone()]).await;
    let sends_before = channel.messages_sent();

    let rsps = node
        .cast_message(Some(&[]), payload(), RequestOptions::sync())
        .await
        .unwrap();
    assert!(rsps.is_empty());

    // members unknown to the view are filtered out entirely
    let rsps = node
        .cast_message(Some(&[Address::from("ghost")]), payload(), RequestOptions::sync())
        .await
        .unwrap();
    assert!(rsps.is_empty());

    assert_eq!(channel.messages_sent(), sends_before);
    assert_eq!(node.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_destinations_are_deduplicated_in_order() {
    let (_switch, members, nodes) = echo_cluster(&["a", "b", "c"]).await;
    let b = members[1].clone();
    let c = members[2].clone();

    let rsps = nodes[0]
        .cast_message(
            Some(&[b.clone(), b.clone(), c.clone()]),
            payload(),
            RequestOptions::sync().with_anycasting(true),
        )
        .await
        .unwrap();

    assert_eq!(rsps.len(), 2);
    assert_eq!(rsps.first().unwrap().sender(), &b);
}

#[tokio::test]
async fn test_dont_loopback_excludes_the_local_member() {
    let (_switch, members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(5))
                .with_transient_flag(TransientFlag::DontLoopback),
        )
        .await
        .unwrap();

    assert_eq!(rsps.len(), 2);
    assert!(rsps.get(&members[0]).is_none());
    assert_eq!(rsps.num_received(), 2);
}

#[tokio::test]
async fn test_discard_own_messages_excludes_the_local_member() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");
    let channel_a = switch.attach(a.clone());
    channel_a.set_discard_own_messages(true);

    let node_a = DispatcherBuilder::new(channel_a)
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(EchoHandler)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    let rsps = node_a
        .cast_message(None, payload(), RequestOptions::sync())
        .await
        .unwrap();
    assert_eq!(rsps.len(), 1);
    assert!(rsps.get(&a).is_none());
    assert!(rsps.get(&b).unwrap().is_received());
}

#[tokio::test]
async fn test_exclusion_list_is_honored() {
    let (_switch, members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::sync().with_exclusion_list([members[2].clone()]),
        )
        .await
        .unwrap();

    assert_eq!(rsps.len(), 2);
    assert!(rsps.get(&members[2]).is_none());
}

#[tokio::test]
async fn test_request_ids_increase_monotonically() {
    let (_switch, _members, nodes) = echo_cluster(&["a", "b"]).await;

    let mut last_id = 0;
    for _ in 0..5 {
        let request = nodes[0]
            .cast_message_with_future(None, payload(), RequestOptions::sync())
            .await
            .unwrap();
        assert!(request.req_id() > last_id);
        last_id = request.req_id();
        request.results().await;
    }
}

struct RejectFrom(Address);

impl RspFilter for RejectFrom {
    fn is_acceptable(&self, sender: &Address, _rsp: &RspValue) -> bool {
        sender != &self.0
    }
}

#[tokio::test]
async fn test_rejected_responses_stay_not_received() {
    let (_switch, members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_millis(300))
                .with_rsp_filter(Arc::new(RejectFrom(members[1].clone()))),
        )
        .await
        .unwrap();

    assert_eq!(rsps.get(&members[1]).unwrap().value(), &RspValue::NotReceived);
    assert_eq!(rsps.num_received(), 2);
}

struct TakeOne {
    accepted: AtomicUsize,
}

impl RspFilter for TakeOne {
    fn is_acceptable(&self, _sender: &Address, _rsp: &RspValue) -> bool {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn needs_more_responses(&self) -> bool {
        self.accepted.load(Ordering::SeqCst) < 1
    }
}

#[tokio::test]
async fn test_filter_can_complete_a_request_early() {
    let (_switch, _members, nodes) = echo_cluster(&["a", "b", "c"]).await;

    let started_at = Instant::now();
    let rsps = nodes[0]
        .cast_message(
            None,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(5)).with_rsp_filter(
                Arc::new(TakeOne {
                    accepted: AtomicUsize::new(0),
                }),
            ),
        )
        .await
        .unwrap();

    // the filter cut the request short before every member was heard from
    assert!(started_at.elapsed() < Duration::from_secs(1));
    assert!(rsps.num_received() >= 1);
}
