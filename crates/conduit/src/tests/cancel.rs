use super::*;

#[tokio::test]
async fn pre_cancelled_token_sends_nothing() {
    let (client_side, _server_side) = loopback();
    let recording = RecordingProtocol::wrap(client_side);
    let client = ChannelClient::new(recording.clone());
    let svc = client.get_channel("svc");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = svc.call_with_cancel("work", Payload::Undefined, &cancel).await.unwrap_err();
    assert!(matches!(err, IpcError::Canceled), "got {err:?}");
    assert!(recording.sent().is_empty());
}

#[tokio::test]
async fn cancel_during_the_initialize_wait_sends_nothing() {
    // The peer never initializes, so the request sits in the gate.
    let (client_side, _server_side) = loopback();
    let recording = RecordingProtocol::wrap(client_side);
    let client = ChannelClient::new(recording.clone());
    let svc = client.get_channel("svc");

    let cancel = CancellationToken::new();
    let call = tokio::spawn({
        let svc = svc.clone();
        let cancel = cancel.clone();
        async move { svc.call_with_cancel("work", Payload::Undefined, &cancel).await }
    });
    settle().await;

    cancel.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, IpcError::Canceled), "got {err:?}");
    assert!(recording.sent().is_empty());
}

#[tokio::test]
async fn cancel_after_send_chases_with_a_cancel_frame() {
    let (client_side, server_side) = loopback();
    let recording = RecordingProtocol::wrap(client_side);
    let hang = Arc::new(HangChannel::default());
    let server = ChannelServer::new(server_side, "main".to_string());
    server.register_channel("svc", hang.clone());
    let client = ChannelClient::new(recording.clone());
    let svc = client.get_channel("svc");

    let cancel = CancellationToken::new();
    let call = tokio::spawn({
        let svc = svc.clone();
        let cancel = cancel.clone();
        async move { svc.call_with_cancel("work", Payload::Undefined, &cancel).await }
    });

    hang.started.notified().await;
    cancel.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, IpcError::Canceled), "got {err:?}");

    // The service's token observes the cancel frame.
    eventually(|| hang.observed_cancel.load(Ordering::SeqCst)).await;

    let frames = recording.sent();
    assert_eq!(
        frames,
        vec![
            Frame::Request(Request::Promise {
                id: 0,
                channel: "svc".into(),
                command: "work".into(),
                arg: Payload::Undefined,
            }),
            Frame::Request(Request::PromiseCancel { id: 0 }),
        ]
    );
}

#[tokio::test]
async fn cancel_frames_for_unknown_ids_are_ignored() {
    let (client_side, server_side) = loopback();
    let server = ChannelServer::new(server_side, "main".to_string());
    server.register_channel("svc", Arc::new(EchoChannel::default()));

    client_side.send(Request::PromiseCancel { id: 999 }.encode());
    client_side.send(Request::EventDispose { id: 998 }.encode());
    settle().await;

    // The server keeps serving afterwards.
    let client = ChannelClient::new(client_side);
    let reply = client.get_channel("svc").call("ping", Payload::String("ok".into())).await.unwrap();
    assert_eq!(reply, Payload::String("ok!".into()));
}
