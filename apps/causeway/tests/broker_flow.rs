use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use causeway::liveness::LivenessMonitor;
use causeway::sessions::SessionState;
use causeway::{router, BrokerState};
use causeway_signal::{Envelope, RegisterStatus};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_broker() -> (String, BrokerState) {
    let state = BrokerState::new();
    let app = router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), state)
}

async fn connect(url: &str) -> Client {
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

async fn send(client: &mut Client, envelope: &Envelope) {
    let json = serde_json::to_string(envelope).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(client: &mut Client) -> Envelope {
    loop {
        match client.next().await.expect("connection open").unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn register(client: &mut Client, id: &str) -> RegisterStatus {
    send(
        client,
        &Envelope::RegisterResponder { id: id.to_string() },
    )
    .await;
    match recv(client).await {
        Envelope::RegisterAck { status, .. } => status,
        other => panic!("expected registration ack, got {other:?}"),
    }
}

#[test_watchdog::tokio_timeout_test]
async fn full_call_flow_between_two_endpoints() {
    let (url, state) = start_broker().await;

    let mut responder = connect(&url).await;
    assert_eq!(register(&mut responder, "abc").await, RegisterStatus::Registered);

    let mut requester = connect(&url).await;
    send(
        &mut requester,
        &Envelope::CallRequest {
            target_id: "abc".to_string(),
            session_id: None,
            caller_name: Some("Dana".to_string()),
        },
    )
    .await;

    assert_eq!(recv(&mut requester).await, Envelope::CallWaiting);
    let session_id = match recv(&mut responder).await {
        Envelope::CallIncoming {
            session_id,
            caller_name,
        } => {
            assert_eq!(caller_name.as_deref(), Some("Dana"));
            session_id
        }
        other => panic!("expected incoming call, got {other:?}"),
    };

    send(
        &mut responder,
        &Envelope::CallAccepted {
            session_id: session_id.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut requester).await,
        Envelope::CallAccepted {
            session_id: session_id.clone()
        }
    );

    // Offer, answer, and candidates cross the broker byte for byte.
    let offer = Envelope::Offer {
        session_id: session_id.clone(),
        description: json!({"type": "offer", "sdp": "v=0 requester"}),
    };
    send(&mut requester, &offer).await;
    assert_eq!(recv(&mut responder).await, offer);
    assert_eq!(
        state.sessions.get(&session_id).unwrap().state,
        SessionState::Negotiating
    );

    let answer = Envelope::Answer {
        session_id: session_id.clone(),
        description: json!({"type": "answer", "sdp": "v=0 responder"}),
    };
    send(&mut responder, &answer).await;
    assert_eq!(recv(&mut requester).await, answer);

    let candidate = Envelope::Candidate {
        session_id: session_id.clone(),
        candidate: json!({"candidate": "candidate:0 1 UDP 1 198.51.100.7 9 typ host"}),
    };
    send(&mut requester, &candidate).await;
    assert_eq!(recv(&mut responder).await, candidate);

    let goodbye = Envelope::CallTerminated {
        session_id: session_id.clone(),
        reason: Some("user_initiated".to_string()),
    };
    send(&mut requester, &goodbye).await;
    assert_eq!(recv(&mut responder).await, goodbye);
    assert!(state.sessions.is_empty());
}

#[test_watchdog::tokio_timeout_test]
async fn preprovisioned_session_id_is_kept() {
    let (url, _state) = start_broker().await;

    let mut responder = connect(&url).await;
    register(&mut responder, "abc").await;

    let mut requester = connect(&url).await;
    send(
        &mut requester,
        &Envelope::CallRequest {
            target_id: "abc".to_string(),
            session_id: Some("link-1".to_string()),
            caller_name: None,
        },
    )
    .await;

    assert_eq!(recv(&mut requester).await, Envelope::CallWaiting);
    assert_eq!(
        recv(&mut responder).await,
        Envelope::CallIncoming {
            session_id: "link-1".to_string(),
            caller_name: None,
        }
    );
}

#[test_watchdog::tokio_timeout_test]
async fn second_registration_is_rejected_but_first_keeps_working() {
    let (url, _state) = start_broker().await;

    let mut first = connect(&url).await;
    assert_eq!(register(&mut first, "abc").await, RegisterStatus::Registered);

    let mut second = connect(&url).await;
    assert_eq!(register(&mut second, "abc").await, RegisterStatus::Rejected);

    let mut requester = connect(&url).await;
    send(
        &mut requester,
        &Envelope::CallRequest {
            target_id: "abc".to_string(),
            session_id: None,
            caller_name: None,
        },
    )
    .await;
    assert_eq!(recv(&mut requester).await, Envelope::CallWaiting);
    assert!(matches!(
        recv(&mut first).await,
        Envelope::CallIncoming { .. }
    ));
}

#[test_watchdog::tokio_timeout_test]
async fn calling_an_unregistered_id_fails_with_an_error() {
    let (url, state) = start_broker().await;

    let mut requester = connect(&url).await;
    send(
        &mut requester,
        &Envelope::CallRequest {
            target_id: "nobody".to_string(),
            session_id: None,
            caller_name: None,
        },
    )
    .await;

    match recv(&mut requester).await {
        Envelope::Error { message } => assert!(message.contains("nobody")),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(state.sessions.is_empty());
}

#[test_watchdog::tokio_timeout_test]
async fn responder_disconnect_terminates_the_session_for_the_requester() {
    let (url, state) = start_broker().await;

    let mut responder = connect(&url).await;
    register(&mut responder, "abc").await;

    let mut requester = connect(&url).await;
    send(
        &mut requester,
        &Envelope::CallRequest {
            target_id: "abc".to_string(),
            session_id: None,
            caller_name: None,
        },
    )
    .await;
    assert_eq!(recv(&mut requester).await, Envelope::CallWaiting);
    let session_id = match recv(&mut responder).await {
        Envelope::CallIncoming { session_id, .. } => session_id,
        other => panic!("expected incoming call, got {other:?}"),
    };

    responder.close(None).await.unwrap();

    assert_eq!(
        recv(&mut requester).await,
        Envelope::CallTerminated {
            session_id,
            reason: Some("peer_disconnected".to_string()),
        }
    );
    assert!(state.sessions.is_empty());
    assert!(state.registry.is_empty());
}

#[test_watchdog::tokio_timeout_test]
async fn malformed_messages_get_an_error_reply() {
    let (url, _state) = start_broker().await;

    let mut client = connect(&url).await;
    client
        .send(Message::Text("not json at all".into()))
        .await
        .unwrap();

    match recv(&mut client).await {
        Envelope::Error { message } => assert!(message.contains("invalid message format")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[test_watchdog::tokio_timeout_test]
async fn silent_transport_is_swept_within_two_periods() {
    let (url, state) = start_broker().await;
    let monitor = LivenessMonitor::new(
        state.connections.clone(),
        state.relay.clone(),
        Duration::from_millis(50),
    );
    tokio::spawn(monitor.run());

    let mut client = connect(&url).await;
    register(&mut client, "abc").await;

    // Keep the socket open but stop reading; pings pile up unanswered, so
    // the monitor must force the close on its second sweep.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !(state.connections.is_empty() && state.registry.is_empty()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("broker should sweep the dead transport");
    drop(client);
}
