use async_std::task;
use futures::channel::oneshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use up2p_core::transport::memory::Chan;
use up2p_traits::{ReadEx, WriteEx};
use up2p_yamux::{Config, Connection, ConnectionError, Mode};

fn spawn_driver(mut conn: Connection<Chan>) {
    task::spawn(async move {
        while conn.next_stream().await.is_ok() {}
    });
}

fn quiet_config() -> Config {
    let mut cfg = Config::new();
    cfg.set_keepalive_interval(None);
    cfg
}

#[async_std::test]
async fn echo_round_trip() {
    let (a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    task::spawn(async move {
        let mut stream = server_ctrl.accept_stream().await.unwrap();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all2(&buf[..n]).await.unwrap();
        }
        stream.close2().await.unwrap();
    });

    let client = Connection::new(a, quiet_config(), Mode::Client);
    let mut client_ctrl = client.control();
    spawn_driver(client);

    let mut stream = client_ctrl.open_stream().await.unwrap();
    let data = vec![0x42u8; 100 * 1024];
    stream.write_all2(&data).await.unwrap();
    stream.close2().await.unwrap();

    let mut echoed = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read2(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        echoed.extend_from_slice(&buf[..n]);
    }
    assert_eq!(echoed, data);
}

#[async_std::test]
async fn write_blocks_on_exhausted_window() {
    let (a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    let client = Connection::new(a, quiet_config(), Mode::Client);
    let mut client_ctrl = client.control();
    spawn_driver(client);

    let mut stream = client_ctrl.open_stream().await.unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let done2 = done.clone();

    // More than the initial 256 KiB window.
    let payload = vec![0xABu8; 300 * 1024];
    let payload_len = payload.len();
    let writer = task::spawn(async move {
        stream.write_all2(&payload).await.unwrap();
        done2.store(true, Ordering::SeqCst);
        stream
    });

    // Nobody reads on the server side: the writer must stall at the
    // window boundary.
    task::sleep(Duration::from_millis(200)).await;
    assert!(!done.load(Ordering::SeqCst), "write completed past the receive window");

    // Start consuming; window updates let the writer finish.
    let mut inbound = server_ctrl.accept_stream().await.unwrap();
    let mut total = 0;
    let mut buf = [0u8; 4096];
    while total < payload_len {
        let n = inbound.read2(&mut buf).await.unwrap();
        assert!(n > 0);
        total += n;
    }
    let _stream = writer.await;
    assert!(done.load(Ordering::SeqCst));
}

#[async_std::test]
async fn half_close_semantics() {
    let (a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    let client = Connection::new(a, quiet_config(), Mode::Client);
    let mut client_ctrl = client.control();
    spawn_driver(client);

    let (tx, rx) = oneshot::channel();
    task::spawn(async move {
        let mut stream = server_ctrl.accept_stream().await.unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        // Write side still works after the remote half-closed.
        stream.write_all2(b"response").await.unwrap();
        stream.close2().await.unwrap();
        tx.send(collected).unwrap();
    });

    let mut stream = client_ctrl.open_stream().await.unwrap();
    stream.write_all2(b"request").await.unwrap();
    stream.close2().await.unwrap();

    let mut response = vec![0u8; 8];
    stream.read_exact2(&mut response).await.unwrap();
    assert_eq!(&response, b"response");
    assert_eq!(stream.read2(&mut [0u8; 8]).await.unwrap(), 0);
    assert_eq!(rx.await.unwrap(), b"request");
}

#[async_std::test]
async fn reset_aborts_the_stream_only() {
    let (a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    let client = Connection::new(a, quiet_config(), Mode::Client);
    let mut client_ctrl = client.control();
    spawn_driver(client);

    let mut stream = client_ctrl.open_stream().await.unwrap();
    stream.write_all2(b"doomed").await.unwrap();

    let mut inbound = server_ctrl.accept_stream().await.unwrap();
    inbound.reset().await.unwrap();

    // The client eventually observes the reset on read.
    let res = loop {
        match stream.read2(&mut [0u8; 16]).await {
            Ok(0) => panic!("expected a reset, got a clean close"),
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert_eq!(res.kind(), std::io::ErrorKind::ConnectionReset);

    // The session is still usable for new streams.
    let mut second = client_ctrl.open_stream().await.unwrap();
    let mut inbound2 = server_ctrl.accept_stream().await.unwrap();
    second.write_all2(b"alive").await.unwrap();
    let mut buf = [0u8; 5];
    inbound2.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"alive");
}

#[async_std::test]
async fn graceful_session_shutdown() {
    let (a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    let client = Connection::new(a, quiet_config(), Mode::Client);
    let mut client_ctrl = client.control();
    spawn_driver(client);

    let mut s1 = client_ctrl.open_stream().await.unwrap();
    let mut s2 = client_ctrl.open_stream().await.unwrap();
    let _in1 = server_ctrl.accept_stream().await.unwrap();
    let _in2 = server_ctrl.accept_stream().await.unwrap();

    client_ctrl.close().await.unwrap();

    // Both streams observe a clean end-of-stream, no reset.
    assert_eq!(s1.read2(&mut [0u8; 8]).await.unwrap(), 0);
    assert_eq!(s2.read2(&mut [0u8; 8]).await.unwrap(), 0);

    // New streams can no longer be opened.
    match client_ctrl.open_stream().await {
        Err(ConnectionError::Closed) => {}
        other => panic!("expected Closed, got {:?}", other.map(|_| ())),
    }
}

#[async_std::test]
async fn duplicate_syn_is_a_protocol_error() {
    let (mut a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut conn = server;
    let driver = task::spawn(async move {
        loop {
            if let Err(e) = conn.next_stream().await {
                break e;
            }
        }
    });

    // Hand-rolled window-update frames carrying SYN for the same stream id.
    // version 0 | type 1 (window update) | flags SYN | stream id 1 | length 0
    let syn_frame: [u8; 12] = [0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0];
    a.write_all2(&syn_frame).await.unwrap();
    a.write_all2(&syn_frame).await.unwrap();

    match driver.await {
        ConnectionError::ProtocolViolation(_) => {}
        other => panic!("expected a protocol violation, got {:?}", other),
    }

    // The server answered the violation with a go-away frame.
    let mut goaway = Vec::new();
    let mut buf = [0u8; 12];
    while let Ok(n) = a.read2(&mut buf).await {
        if n == 0 {
            break;
        }
        goaway.extend_from_slice(&buf[..n]);
    }
    assert!(goaway.chunks(12).any(|h| h.len() == 12 && h[1] == 3), "no go-away observed");
}

#[async_std::test]
async fn keepalive_times_out_against_a_silent_peer() {
    let (a, _b) = Chan::pair();

    let mut cfg = Config::new();
    cfg.set_keepalive_interval(Some(Duration::from_millis(50)));
    cfg.set_ping_timeout(Duration::from_millis(100));

    let mut conn = Connection::new(a, cfg, Mode::Client);
    let err = loop {
        if let Err(e) = conn.next_stream().await {
            break e;
        }
    };
    match err {
        ConnectionError::Timeout => {}
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[async_std::test]
async fn zero_window_update_is_a_no_op() {
    let (mut a, b) = Chan::pair();

    let server = Connection::new(b, quiet_config(), Mode::Server);
    let mut server_ctrl = server.control();
    spawn_driver(server);

    // Open stream id 1 then send a window update of zero; the session must
    // carry on undisturbed.
    let syn_frame: [u8; 12] = [0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0];
    a.write_all2(&syn_frame).await.unwrap();
    let zero_update: [u8; 12] = [0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0];
    a.write_all2(&zero_update).await.unwrap();
    // data frame: version 0 | type 0 | no flags | stream 1 | len 2, body "ok"
    let data: [u8; 14] = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, b'o', b'k'];
    a.write_all2(&data).await.unwrap();

    let mut inbound = server_ctrl.accept_stream().await.unwrap();
    let mut buf = [0u8; 2];
    inbound.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");
}
