use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use convoke::test_utils::{EchoHandler, FailingHandler, LocalSwitch, SilentHandler};
use convoke::{
    Address,
    ChannelError,
    DispatchError,
    Dispatcher,
    DispatcherBuilder,
    RequestHandler,
    RequestOptions,
    ResponseMode,
};

fn payload() -> Bytes {
    Bytes::from_static(b"ping")
}

async fn pair<H>(handler_b: H) -> (Arc<LocalSwitch>, Address, Address, Arc<Dispatcher>)
where
    H: RequestHandler + 'static,
{
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");

    let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(handler_b)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    (switch, a, b, node_a)
}

#[tokio::test]
async fn test_unicast_returns_the_response_value() {
    let (_switch, _a, b, node_a) = pair(EchoHandler).await;

    let reply = node_a
        .send_message(b, payload(), RequestOptions::sync())
        .await
        .unwrap();
    assert_eq!(reply, Some(payload()));
    assert_eq!(node_a.stats().unicasts(true), 1);
    assert_eq!(node_a.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_remote_failure_is_surfaced() {
    let (_switch, _a, b, node_a) = pair(FailingHandler("boom")).await;

    let result = node_a
        .send_message(b, payload(), RequestOptions::sync())
        .await;
    match result {
        Err(DispatchError::Remote(text)) => assert!(text.contains("boom")),
        other => panic!("expected a remote failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unicast_timeout_is_an_error() {
    let (_switch, _a, b, node_a) = pair(SilentHandler).await;

    let result = node_a
        .send_message(
            b,
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_millis(200)),
        )
        .await;
    assert!(matches!(result, Err(DispatchError::Timeout(_))));
    assert_eq!(node_a.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_suspected_target_fails_the_call() {
    let (switch, _a, b, node_a) = pair(SilentHandler).await;

    let request = node_a
        .send_message_with_future(
            b.clone(),
            payload(),
            RequestOptions::new(ResponseMode::GetAll, Duration::from_secs(30)),
        )
        .await
        .unwrap()
        .unwrap();

    switch.suspect(&b).await;
    let result = request.result().await;
    assert!(matches!(result, Err(DispatchError::Suspected(member)) if member == b));
}

#[tokio::test]
async fn test_fire_and_forget_registers_nothing() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");
    let channel_a = switch.attach(a.clone());

    let node_a = DispatcherBuilder::new(channel_a.clone())
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(EchoHandler)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    let reply = node_a
        .send_message_with_future(b, payload(), RequestOptions::fire_and_forget())
        .await
        .unwrap();

    assert!(reply.is_none());
    assert_eq!(channel_a.messages_sent(), 1);
    assert_eq!(node_a.stats().unicasts(false), 1);
    assert_eq!(node_a.stats().unicasts(true), 0);
    assert_eq!(node_a.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_unreachable_target_fails_the_send() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let ghost = Address::from("ghost");

    let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
        .with_request_handler(EchoHandler)
        .build();
    // the view believes in "ghost" but nothing is attached for it
    switch.install_view(&[a.clone(), ghost.clone()]).await;

    let result = node_a
        .send_message(ghost.clone(), payload(), RequestOptions::sync())
        .await;
    match result {
        Err(DispatchError::Send(ChannelError::Unreachable(member))) => {
            assert_eq!(member, ghost)
        },
        other => panic!("expected an unreachable failure, got {other:?}"),
    }
    assert_eq!(node_a.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_disconnected_channel_refuses_to_send() {
    let _ = tracing_subscriber::fmt::try_init();

    let switch = LocalSwitch::new();
    let a = Address::from("a");
    let b = Address::from("b");
    let channel_a = switch.attach(a.clone());

    let node_a = DispatcherBuilder::new(channel_a.clone())
        .with_request_handler(EchoHandler)
        .build();
    let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
        .with_request_handler(EchoHandler)
        .build();
    switch.install_view(&[a.clone(), b.clone()]).await;

    channel_a.set_connected(false);
    let result = node_a
        .send_message(b, payload(), RequestOptions::sync())
        .await;
    assert!(matches!(result, Err(DispatchError::NotConnected)));
    assert_eq!(node_a.outstanding_requests(), 0);
}
