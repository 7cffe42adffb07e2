//! Stream-client round trips against a local websocket server.

use futures::{SinkExt, StreamExt};
use polymarket::ws::{StreamClient, StreamEvent};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const BOOK_JSON: &str = r#"{
    "event_type": "book",
    "asset_id": "T1",
    "market": "0xabc",
    "timestamp": "1704067200000",
    "buys": [{"price": "0.42", "size": "100"}],
    "sells": [{"price": "0.45", "size": "50"}]
}"#;

#[tokio::test]
async fn subscribe_and_read_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

        // the first frame must be the market subscription
        let frame = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "market");
        assert_eq!(value["initial_dump"], true);
        let ids: Vec<&str> = value["assets_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);

        // answer with a depth snapshot
        ws.send(Message::Text(BOOK_JSON.to_string())).await.unwrap();

        // keep the connection open until the client closes it
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let mut client = StreamClient::connect(&format!("ws://{addr}")).await.unwrap();
    let tokens = vec!["t1".to_string(), "t2".to_string(), "t3".to_string()];
    client.subscribe(&tokens, true, None).await.unwrap();

    let cancel = CancellationToken::new();
    match client.read_message(&cancel).await.unwrap() {
        StreamEvent::Book(book) => {
            assert_eq!(book.asset_id, "T1");
            assert_eq!(book.buys.len(), 1);
            assert_eq!(book.buys[0].price.0, 420_000);
            assert_eq!(book.sells[0].size.0, 50_000_000);
        }
        other => panic!("expected book event, got {other:?}"),
    }

    client.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn read_message_is_cancellable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        // send nothing; just hold the connection open
        let _ = ws.next().await;
    });

    let mut client = StreamClient::connect(&format!("ws://{addr}")).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = client.read_message(&cancel).await.unwrap_err();
    assert!(matches!(err, polymarket::error::Error::Cancelled));

    canceller.await.unwrap();
    drop(client);
    server.abort();
}

#[tokio::test]
async fn server_disconnect_surfaces_connection_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        drop(ws);
    });

    let mut client = StreamClient::connect(&format!("ws://{addr}")).await.unwrap();
    let cancel = CancellationToken::new();
    let err = client.read_message(&cancel).await.unwrap_err();
    // a dropped peer shows up as either a closed connection or a transport
    // error depending on how the socket dies
    assert!(!err.is_protocol());
}
