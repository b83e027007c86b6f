//! ClientHello fragmentation over real loopback TCP
//!
//! The peer must always receive a byte stream equivalent to the original
//! ClientHello: identical bytes in segment mode, identical handshake payload
//! re-framed as several records in record mode.

use sb_common::tlsfrag::index_server_name;
use sb_transport::{DefaultDialer, DialContext, Dialer, FragmentConn};
use sb_types::{Destination, DialerOptions, TlsFragmentOptions};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TRAILER: &[u8] = b"application data";

/// Minimal TLS 1.2 ClientHello with a server_name extension.
fn client_hello(sni: &str) -> Vec<u8> {
    let name = sni.as_bytes();
    let mut ext = vec![0x00, 0x00];
    ext.extend_from_slice(&((name.len() + 5) as u16).to_be_bytes());
    ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    ext.push(0x00);
    ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
    ext.extend_from_slice(name);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x5a; 32]);
    body.push(0x00);
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0x13, 0x02, 0x01, 0x00]);
    body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext);

    let mut hello = vec![0x16, 0x03, 0x01];
    hello.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    hello.push(0x01);
    hello.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    hello.extend_from_slice(&body);
    hello
}

/// Split `data` into TLS records, returning (record count, joined payload).
fn unframe(mut data: &[u8]) -> (usize, Vec<u8>) {
    let mut payload = Vec::new();
    let mut records = 0;
    while data.len() >= 5 {
        let len = u16::from_be_bytes([data[3], data[4]]) as usize;
        payload.extend_from_slice(&data[5..5 + len]);
        data = &data[5 + len..];
        records += 1;
    }
    assert!(data.is_empty(), "trailing partial record");
    (records, payload)
}

async fn sink() -> (Destination, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });
    (Destination::socket(addr), server)
}

async fn send_through(options: &TlsFragmentOptions, hello: &[u8]) -> Vec<u8> {
    let (dest, server) = sink().await;
    let dialer = DefaultDialer::new(&DialerOptions::default());
    let stream = dialer.dial_stream(&DialContext::new(), &dest).await.unwrap();
    let mut stream = FragmentConn::wrap(stream, options, CancellationToken::new());

    stream.write_all(hello).await.unwrap();
    stream.write_all(TRAILER).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server finished")
        .unwrap()
}

#[tokio::test]
async fn segment_mode_delivers_identical_bytes() {
    let hello = client_hello("www.github.com");
    let options = TlsFragmentOptions {
        fragment: true,
        fragment_fallback_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let received = send_through(&options, &hello).await;

    let (sent_hello, trailer) = received.split_at(hello.len());
    assert_eq!(sent_hello, hello.as_slice());
    assert_eq!(trailer, TRAILER);
}

#[tokio::test]
async fn record_mode_reframes_handshake() {
    let hello = client_hello("www.github.com");
    let options = TlsFragmentOptions {
        record_fragment: true,
        ..Default::default()
    };
    let received = send_through(&options, &hello).await;

    let framed = &received[..received.len() - TRAILER.len()];
    assert_eq!(&received[framed.len()..], TRAILER);
    let (records, payload) = unframe(framed);
    // www + github each get one cut; com stays whole.
    assert_eq!(records, 3);
    assert_eq!(payload, hello[5..]);
}

#[tokio::test]
async fn record_mode_takes_precedence() {
    let hello = client_hello("api.example.co.uk");
    let options = TlsFragmentOptions {
        fragment: true,
        record_fragment: true,
        fragment_fallback_delay: Some(Duration::from_secs(30)),
    };
    let received = tokio::time::timeout(Duration::from_secs(5), send_through(&options, &hello))
        .await
        .expect("record mode never waits for acknowledgment");

    let (records, payload) = unframe(&received[..received.len() - TRAILER.len()]);
    assert_eq!(records, 3);
    assert_eq!(payload, hello[5..]);
}

#[tokio::test]
async fn non_tls_first_write_is_untouched() {
    let request = b"GET / HTTP/1.1\r\nHost: www.github.com\r\n\r\n";
    let options = TlsFragmentOptions {
        record_fragment: true,
        ..Default::default()
    };
    let received = send_through(&options, request).await;
    assert!(index_server_name(request).is_none());
    assert_eq!(&received[..request.len()], request);
    assert_eq!(&received[request.len()..], TRAILER);
}
