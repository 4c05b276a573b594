//! WebSocket upstream link tests against the mock voice service

mod support;

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio::time::timeout;

use support::voice_service_mock::{MockVoiceService, Step};
use voice_relay::core::relay::{
    LinkState, RelayError, SessionTarget, UpstreamConnector, UpstreamEvent, UpstreamLink,
    UpstreamMessage, WebSocketConnector,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(link: &mut UpstreamLink) -> UpstreamEvent {
    timeout(WAIT, link.recv())
        .await
        .expect("timed out waiting for upstream event")
        .expect("link events ended")
}

#[tokio::test]
async fn test_connect_emits_opened_first() {
    let service = MockVoiceService::start(vec![Step::Sleep(Duration::from_secs(2))]).await;
    let target = SessionTarget::new(service.url()).unwrap();

    let mut link = WebSocketConnector::default().connect(&target).await.unwrap();

    assert_eq!(next_event(&mut link).await, UpstreamEvent::Opened);
    assert!(link.is_open());
    assert_eq!(service.connection_count(), 1);
}

#[tokio::test]
async fn test_audio_reaches_service_in_order() {
    let service = MockVoiceService::start(vec![Step::WaitForAudio(9)]).await;
    let target = SessionTarget::new(service.url()).unwrap();

    let mut link = WebSocketConnector::default().connect(&target).await.unwrap();
    assert_eq!(next_event(&mut link).await, UpstreamEvent::Opened);

    for chunk in ["abc", "def", "ghi"] {
        assert!(link.send(Bytes::from(chunk)).await);
    }

    assert!(
        service
            .wait_until(WAIT, |s| s.received_audio().len() >= 9)
            .await
    );
    assert_eq!(service.received_audio(), b"abcdefghi");
}

#[tokio::test]
async fn test_service_frames_and_close_reason_delivered() {
    let transcript = json!({"type": "transcript", "final": true, "role": "agent", "medium": "voice", "text": "hi"});
    let service = MockVoiceService::start(vec![
        Step::Binary(vec![1, 2, 3]),
        Step::Text(transcript.to_string()),
        Step::Close("call complete".to_string()),
    ])
    .await;
    let target = SessionTarget::new(service.url()).unwrap();

    let mut link = WebSocketConnector::default().connect(&target).await.unwrap();

    assert_eq!(next_event(&mut link).await, UpstreamEvent::Opened);
    assert_eq!(
        next_event(&mut link).await,
        UpstreamEvent::Message(UpstreamMessage::Binary(Bytes::from_static(&[1, 2, 3])))
    );
    assert_eq!(
        next_event(&mut link).await,
        UpstreamEvent::Message(UpstreamMessage::Text(transcript.to_string()))
    );
    assert_eq!(
        next_event(&mut link).await,
        UpstreamEvent::Closed(Some("call complete".to_string()))
    );
    assert_eq!(link.state(), LinkState::Closed);

    // Nothing left to close, and sends are dropped
    assert!(!link.close().await);
    assert!(!link.send(Bytes::from_static(b"late")).await);
}

#[tokio::test]
async fn test_slow_reader_loses_no_frames() {
    let mut script: Vec<Step> = (0..20u8).map(|i| Step::Binary(vec![i; 4])).collect();
    script.push(Step::Close("done".to_string()));
    let service = MockVoiceService::start(script).await;
    let target = SessionTarget::new(service.url()).unwrap();

    let mut link = WebSocketConnector::new(2).connect(&target).await.unwrap();

    // Let the service get well ahead of us
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(next_event(&mut link).await, UpstreamEvent::Opened);
    for i in 0..20u8 {
        assert_eq!(
            next_event(&mut link).await,
            UpstreamEvent::Message(UpstreamMessage::Binary(Bytes::from(vec![i; 4])))
        );
    }
    assert_eq!(
        next_event(&mut link).await,
        UpstreamEvent::Closed(Some("done".to_string()))
    );
}

#[tokio::test]
async fn test_close_is_sent_once() {
    let service = MockVoiceService::start(vec![Step::Sleep(Duration::from_secs(5))]).await;
    let target = SessionTarget::new(service.url()).unwrap();

    let mut link = WebSocketConnector::default().connect(&target).await.unwrap();
    assert_eq!(next_event(&mut link).await, UpstreamEvent::Opened);

    let (first, second) = tokio::join!(link.close(), link.close());
    assert!(first ^ second, "exactly one close call should win");
    assert!(!link.close().await);
    assert_eq!(link.state(), LinkState::Closing);

    assert!(service.wait_until(WAIT, |s| s.client_closed()).await);

    // Either the peer's close reply or the grace deadline ends the link
    match timeout(WAIT, link.recv()).await.unwrap() {
        Some(UpstreamEvent::Closed(_)) | None => {}
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let target = SessionTarget::new(format!("ws://{addr}/session")).unwrap();
    let err = WebSocketConnector::default()
        .connect(&target)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::UpstreamConnectionFailure(_)));
}
