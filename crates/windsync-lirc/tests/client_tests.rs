//! LIRC client tests against a local TCP listener.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use windsync_lirc::{LircClient, LircError, RemoteMapping};

/// Read lines from one accepted connection, replying like lircd, and forward
/// them tagged with the connection number.
async fn serve_connection(
    stream: TcpStream,
    conn: usize,
    lines: mpsc::UnboundedSender<(usize, String)>,
    close: Option<oneshot::Receiver<()>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read).lines();
    let mut close = close;

    loop {
        let line = match close.as_mut() {
            Some(rx) => tokio::select! {
                _ = rx => return,
                line = reader.next_line() => line,
            },
            None => reader.next_line().await,
        };
        let Ok(Some(line)) = line else {
            return;
        };
        let reply = format!("BEGIN\n{}\nSUCCESS\nEND\n", line);
        let _ = write.write_all(reply.as_bytes()).await;
        let _ = lines.send((conn, line));
    }
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[tokio::test]
async fn test_send_commands_in_order() {
    let (listener, addr) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_connection(stream, 1, tx, None).await;
    });

    let mut client = LircClient::new(addr, "EHF10127B");
    client.send_commands("LOW,SWING").await.unwrap();
    client.send_commands("OFF").await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(rx.recv().await.unwrap());
    }
    assert_eq!(
        received,
        vec![
            (1, "SEND_ONCE EHF10127B LOW".to_string()),
            (1, "SEND_ONCE EHF10127B SWING".to_string()),
            (1, "SEND_ONCE EHF10127B OFF".to_string()),
        ]
    );
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_mapping_overrides_remote_and_off() {
    let (listener, addr) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_connection(stream, 1, tx, None).await;
    });

    let mapping = RemoteMapping::parse("OSCILLATOR=SWING\nPOWER=STOP\n");
    let mut client = LircClient::new(addr, "EHF10127B").with_mapping(mapping);
    client.send_commands("HIGH,SWING").await.unwrap();
    client.send_off().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(rx.recv().await.unwrap().1);
    }
    assert_eq!(
        received,
        vec![
            "SEND_ONCE EHF10127B HIGH".to_string(),
            "SEND_ONCE OSCILLATOR SWING".to_string(),
            "SEND_ONCE EHF10127B POWER".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_set_transmitters() {
    let (listener, addr) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_connection(stream, 1, tx, None).await;
    });

    let mut client = LircClient::new(addr, "EHF10127B");
    client.set_transmitters(&[1, 2]).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().1, "SET_TRANSMITTERS 1 2");
    assert!(matches!(
        client.set_transmitters(&[7]).await,
        Err(LircError::InvalidChannel(7))
    ));
}

#[tokio::test]
async fn test_reconnects_after_peer_closes() {
    let (listener, addr) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        serve_connection(first, 1, tx.clone(), Some(close_rx)).await;
        let _ = closed_tx.send(());

        let (second, _) = listener.accept().await.unwrap();
        serve_connection(second, 2, tx, None).await;
    });

    let mut client = LircClient::new(addr, "EHF10127B");
    client.send_once("HIGH").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), (1, "SEND_ONCE EHF10127B HIGH".to_string()));

    close_tx.send(()).unwrap();
    closed_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.send_once("OFF").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), (2, "SEND_ONCE EHF10127B OFF".to_string()));
}

#[tokio::test]
async fn test_disconnect_and_remap_apply_to_next_send() {
    let (listener, addr) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        serve_connection(first, 1, tx.clone(), None).await;

        let (second, _) = listener.accept().await.unwrap();
        serve_connection(second, 2, tx, None).await;
    });

    let mut client = LircClient::new(addr.clone(), "EHF10127B");
    assert_eq!(client.addr(), addr);
    client.send_off().await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), (1, "SEND_ONCE EHF10127B OFF".to_string()));

    client.disconnect();
    assert!(!client.is_connected());
    client.set_mapping(RemoteMapping::parse("POWER=STOP\n"));

    client.send_off().await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), (2, "SEND_ONCE EHF10127B POWER".to_string()));
}

#[tokio::test]
async fn test_unreachable_daemon_reports_error() {
    let (listener, addr) = listener().await;
    drop(listener);

    let mut client = LircClient::new(addr.clone(), "EHF10127B");
    let err = client.send_once("HIGH").await.unwrap_err();

    assert!(matches!(
        err,
        LircError::Connect { .. } | LircError::ConnectTimeout { .. }
    ));
    assert_eq!(err.addr(), Some(addr.as_str()));
    assert!(!client.is_connected());
}
