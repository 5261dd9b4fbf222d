use async_std::task;
use std::time::Duration;
use up2p_traits::{ReadEx, WriteEx};
use up2p_udx::{UdxConfig, UdxError, UdxSocket};

async fn socket_pair() -> (UdxSocket, UdxSocket) {
    let a = UdxSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let b = UdxSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (a, b)
}

#[async_std::test]
async fn connect_accept_and_echo() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let server = task::spawn(async move {
        let mut stream = b.accept().await.unwrap();
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

    let mut stream = a.connect(b_addr).await.unwrap();
    let data: Vec<u8> = (0..128 * 1024).map(|i| (i % 251) as u8).collect();
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
    assert_eq!(echoed.len(), data.len());
    assert_eq!(echoed, data);
    server.await;
}

#[async_std::test]
async fn one_megabyte_one_way() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let expected_len = 1024 * 1024;
    let server = task::spawn(async move {
        let mut stream = b.accept().await.unwrap();
        let mut received = Vec::with_capacity(expected_len);
        let mut buf = [0u8; 16 * 1024];
        loop {
            let n = stream.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let mut stream = a.connect(b_addr).await.unwrap();
    let data = vec![0xABu8; expected_len];
    stream.write_all2(&data).await.unwrap();
    stream.close2().await.unwrap();

    let received = server.await;
    assert_eq!(received.len(), expected_len);
    assert!(received.iter().all(|&b| b == 0xAB));
}

#[async_std::test]
async fn both_directions_at_once() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let server = task::spawn(async move {
        let mut stream = b.accept().await.unwrap();
        stream.write_all2(&vec![1u8; 200 * 1024]).await.unwrap();
        stream.close2().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = stream.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let stream = a.connect(b_addr).await.unwrap();
    let writer = {
        let data = vec![2u8; 200 * 1024];
        let (mut r, mut w) = {
            use up2p_traits::SplitEx;
            stream.split()
        };
        let writer = task::spawn(async move {
            w.write_all2(&data).await.unwrap();
            w.close2().await.unwrap();
        });
        let mut received = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = r.read2(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received.len(), 200 * 1024);
        assert!(received.iter().all(|&x| x == 1));
        writer
    };
    writer.await;

    let received = server.await;
    assert_eq!(received.len(), 200 * 1024);
    assert!(received.iter().all(|&x| x == 2));
}

#[async_std::test]
async fn dial_to_silent_port_is_refused() {
    let mut config = UdxConfig::new();
    config
        .set_rto(
            Duration::from_millis(30),
            Duration::from_millis(20),
            Duration::from_millis(100),
        )
        .set_syn_retries(2);
    let a = UdxSocket::bind_with_config("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap();

    // A UDP port nobody answers on: bind a socket and immediately let the
    // endpoint drop its listener by using a fresh, never-accepting peer.
    let dead = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let dead_addr = dead.local_addr().unwrap();

    match a.connect(dead_addr).await {
        Err(UdxError::ConnectionRefused) => {}
        other => panic!("expected refusal, got {:?}", other.map(|_| ())),
    }
}

#[async_std::test]
async fn drop_without_close_resets_the_peer() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let server = task::spawn(async move {
        let mut stream = b.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read2(&mut buf).await {
                Ok(0) => panic!("expected a reset, got a clean close"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        }
    });

    let mut stream = a.connect(b_addr).await.unwrap();
    stream.write_all2(b"about to vanish").await.unwrap();
    task::sleep(Duration::from_millis(50)).await;
    drop(stream);

    let err = server.await;
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
}

#[async_std::test]
async fn explicit_reset_fails_peer_io() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let server = task::spawn(async move {
        let mut stream = b.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        // Read the first chunk, then wait for the reset.
        let n = stream.read2(&mut buf).await.unwrap();
        assert!(n > 0);
        loop {
            match stream.read2(&mut buf).await {
                Ok(0) => panic!("expected a reset"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        }
    });

    let mut stream = a.connect(b_addr).await.unwrap();
    stream.write_all2(&vec![7u8; 4096]).await.unwrap();
    task::sleep(Duration::from_millis(50)).await;
    stream.reset();
    task::sleep(Duration::from_millis(50)).await;

    let err = server.await;
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
}

#[async_std::test]
async fn many_streams_share_one_socket() {
    let (a, b) = socket_pair().await;
    let b_addr = b.local_addr();

    let server = task::spawn(async move {
        for _ in 0..4u8 {
            let mut stream = b.accept().await.unwrap();
            task::spawn(async move {
                let mut buf = [0u8; 256];
                let n = stream.read2(&mut buf).await.unwrap();
                stream.write_all2(&buf[..n]).await.unwrap();
                stream.close2().await.unwrap();
            });
        }
        b
    });

    for i in 0..4u8 {
        let mut stream = a.connect(b_addr).await.unwrap();
        let msg = vec![i; 32];
        stream.write_all2(&msg).await.unwrap();
        let mut buf = vec![0u8; 32];
        stream.read_exact2(&mut buf).await.unwrap();
        assert_eq!(buf, msg);
        stream.close2().await.unwrap();
    }
    let _b = server.await;
}
