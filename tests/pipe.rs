//! Ordering and close behaviour of endpoint pairs under concurrent use.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wstest::net::{is_closed_pipe, pair};

fn random_writes(rng: &mut StdRng) -> Vec<Vec<u8>> {
    let count = rng.gen_range(1..40);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(0..300);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concatenated_reads_equal_concatenated_writes() {
    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let writes = random_writes(&mut rng);
        let expected: Vec<u8> = writes.concat();
        let read_size = rng.gen_range(1..17);

        let (mut client, mut server) = pair();
        let writer = tokio::spawn(async move {
            for chunk in writes {
                client.write_all(&chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client.close();
        });

        let mut got = Vec::new();
        let mut buf = vec![0u8; read_size];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= read_size);
            got.extend_from_slice(&buf[..n]);
        }

        writer.await.unwrap();
        assert_eq!(got, expected, "seed {seed}, read size {read_size}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_both_directions_at_once() {
    let (client, server) = pair();
    let up: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    let down: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();

    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut server_rx, mut server_tx) = tokio::io::split(server);

    let up_sent = up.clone();
    let down_sent = down.clone();
    let client_writer = tokio::spawn(async move {
        for chunk in up_sent.chunks(333) {
            client_tx.write_all(chunk).await.unwrap();
        }
        client_tx
    });
    let server_writer = tokio::spawn(async move {
        for chunk in down_sent.chunks(127) {
            server_tx.write_all(chunk).await.unwrap();
        }
        server_tx
    });

    let server_reader = tokio::spawn(async move {
        let mut got = vec![0u8; 10_000];
        server_rx.read_exact(&mut got).await.unwrap();
        got
    });
    let mut got_down = vec![0u8; 10_000];
    client_rx.read_exact(&mut got_down).await.unwrap();

    assert_eq!(server_reader.await.unwrap(), up);
    assert_eq!(got_down, down);
    drop(client_writer.await.unwrap());
    drop(server_writer.await.unwrap());
}

#[tokio::test]
async fn test_close_then_drain_never_hangs() {
    let (mut client, mut server) = pair();
    client.write_all(b"in flight").await.unwrap();
    client.close();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut out))
        .await
        .expect("read after peer close must not block")
        .unwrap();
    assert_eq!(out, b"in flight");
}

#[tokio::test]
async fn test_writes_fail_after_close_in_both_directions() {
    let (mut client, mut server) = pair();
    client.close();

    let err = client.write_all(b"mine").await.unwrap_err();
    assert!(is_closed_pipe(&err));
    let err = server.write_all(b"theirs").await.unwrap_err();
    assert!(is_closed_pipe(&err));

    let (mut client, mut server) = pair();
    server.close();

    let err = server.write_all(b"mine").await.unwrap_err();
    assert!(is_closed_pipe(&err));
    let err = client.write_all(b"theirs").await.unwrap_err();
    assert!(is_closed_pipe(&err));
}

#[tokio::test]
async fn test_close_does_not_lose_earlier_writes_from_the_closed_side() {
    let (mut client, mut server) = pair();
    server.write_all(b"reply").await.unwrap();
    server.close();

    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"reply");
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unrelated_pairs_are_independent() {
    let (mut a_client, mut a_server) = pair();
    let (mut b_client, mut b_server) = pair();
    assert_ne!(a_client.id(), b_client.id());

    a_client.write_all(b"a").await.unwrap();
    b_client.write_all(b"b").await.unwrap();
    a_client.close();

    let mut buf = [0u8; 1];
    b_server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"b");
    assert!(!b_server.peer_closed());

    let mut out = Vec::new();
    a_server.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"a");
}
