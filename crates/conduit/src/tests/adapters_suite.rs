use super::*;

fn echo_pair() -> (ChannelClient, ChannelServer<String>, Arc<EchoChannel>) {
    let (client_side, server_side) = loopback();
    let echo = Arc::new(EchoChannel::default());
    let server = ChannelServer::new(server_side, "main".to_string());
    server.register_channel("svc", echo.clone());
    let client = ChannelClient::new(client_side);
    (client, server, echo)
}

#[tokio::test]
async fn delayed_channels_forward_calls_once_resolved() {
    let (client, _server, _echo) = echo_pair();
    let remote = client.get_channel("svc");

    let delayed = DelayedChannel::new(async move {
        tokio::task::yield_now().await;
        Arc::new(remote) as Arc<dyn ClientChannel>
    });

    assert_eq!(
        delayed.call("ping", Payload::String("hi".into())).await.unwrap(),
        Payload::String("hi!".into())
    );
}

#[tokio::test]
async fn delayed_channels_relay_events() {
    let (client, _server, echo) = echo_pair();
    let remote = client.get_channel("svc");

    let delayed =
        DelayedChannel::new(async move { Arc::new(remote) as Arc<dyn ClientChannel> });
    let source = delayed.listen("onTick", Payload::Undefined);
    let mut stream = source.subscribe();

    eventually(|| echo.tick_subscribers() == 1).await;
    echo.fire_tick(Payload::Json(json!(9)));
    assert_eq!(stream.recv().await, Some(Payload::Json(json!(9))));
}

#[tokio::test]
async fn dropping_relay_streams_disposes_the_remote_subscription() {
    let (client_side, server_side) = loopback();
    let recording = RecordingProtocol::wrap(client_side);
    let echo = Arc::new(EchoChannel::default());
    let server = ChannelServer::new(server_side, "main".to_string());
    server.register_channel("svc", echo.clone());
    let client = ChannelClient::new(recording.clone());
    let remote = client.get_channel("svc");

    let delayed =
        DelayedChannel::new(async move { Arc::new(remote) as Arc<dyn ClientChannel> });
    let source = delayed.listen("onTick", Payload::Undefined);
    let stream = source.subscribe();
    eventually(|| echo.tick_subscribers() == 1).await;

    drop(stream);
    eventually(|| {
        recording
            .sent()
            .iter()
            .any(|frame| matches!(frame, Frame::Request(Request::EventDispose { .. })))
    })
    .await;
}

#[tokio::test]
async fn delayed_channels_honor_cancellation_while_unresolved() {
    let delayed = DelayedChannel::new(futures::future::pending());
    let cancel = CancellationToken::new();

    let call = tokio::spawn({
        let delayed = delayed.clone();
        let cancel = cancel.clone();
        async move { delayed.call_with_cancel("work", Payload::Undefined, &cancel).await }
    });
    settle().await;
    assert!(!call.is_finished());

    cancel.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, IpcError::Canceled), "got {err:?}");
}

#[tokio::test]
async fn next_tick_channels_defer_only_the_first_operation() {
    let (client, _server, _echo) = echo_pair();
    let channel = NextTickChannel::new(Arc::new(client.get_channel("svc")));

    assert_eq!(
        channel.call("ping", Payload::String("a".into())).await.unwrap(),
        Payload::String("a!".into())
    );
    assert_eq!(
        channel.call("ping", Payload::String("b".into())).await.unwrap(),
        Payload::String("b!".into())
    );
}

#[tokio::test]
async fn next_tick_listen_defers_and_still_delivers() {
    let (client, _server, echo) = echo_pair();
    let channel = NextTickChannel::new(Arc::new(client.get_channel("svc")));

    let source = channel.listen("onTick", Payload::Undefined);
    let mut stream = source.subscribe();

    eventually(|| echo.tick_subscribers() == 1).await;
    echo.fire_tick(Payload::Json(json!("late")));
    assert_eq!(stream.recv().await, Some(Payload::Json(json!("late"))));
}
