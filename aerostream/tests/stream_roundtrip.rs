#![cfg(all(feature = "transport-tcp", feature = "transport-tls"))]

use aerostream::error::TlsError;
use aerostream::prelude::*;
use aerostream::ErrorKind;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_test::assert_ok;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
enum Event {
    NewBytes,
    Closed,
    Failed,
}

struct ChannelDelegate {
    events: mpsc::UnboundedSender<Event>,
}

impl StreamDelegate for ChannelDelegate {
    fn new_bytes_available(&self) {
        let _ = self.events.send(Event::NewBytes);
    }

    fn stream_did_error(&self, error: Option<&Error>) {
        let _ = self.events.send(if error.is_some() {
            Event::Failed
        } else {
            Event::Closed
        });
    }
}

fn attach(stream: &NetworkStream) -> (Arc<dyn StreamDelegate>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let delegate: Arc<dyn StreamDelegate> = Arc::new(ChannelDelegate { events: tx });
    stream.set_delegate(Arc::downgrade(&delegate));
    (delegate, rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("no event")
        .expect("channel closed")
}

async fn local_listener() -> (TcpListener, ConnectTarget) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ConnectTarget::new("127.0.0.1", i64::from(port)))
}

struct TestCert {
    der: Vec<u8>,
    pem: String,
    acceptor: TlsAcceptor,
}

fn localhost_cert() -> TestCert {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let der = cert.serialize_der().unwrap();
    let pem = cert.serialize_pem().unwrap();
    let key = cert.serialize_private_key_der();

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![rustls::Certificate(der.clone())], rustls::PrivateKey(key))
        .unwrap();

    TestCert {
        der,
        pem,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    }
}

/// Accept one TLS client and echo whatever it sends until it goes away
fn spawn_tls_echo(listener: TcpListener, acceptor: TlsAcceptor) {
    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut tls) = acceptor.accept(socket).await else {
            return;
        };
        let mut buf = [0u8; 1024];
        while let Ok(n) = tls.read(&mut buf).await {
            if n == 0 || tls.write_all(&buf[..n]).await.is_err() {
                break;
            }
            let _ = tls.flush().await;
        }
    });
}

async fn read_exactly(
    stream: &NetworkStream,
    events: &mut mpsc::UnboundedReceiver<Event>,
    len: usize,
) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        assert_eq!(next_event(events).await, Event::NewBytes);
        if let Some(bytes) = stream.read() {
            received.extend_from_slice(&bytes);
        }
    }
    received
}

#[tokio::test]
async fn plain_request_response() {
    let (listener, target) = local_listener().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 5];
        socket.read_exact(&mut request).await.unwrap();
        socket.write_all(b"abc").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        socket.write_all(b"de").await.unwrap();
        (request, socket)
    });

    let stream = NetworkStream::new();
    let (_delegate, mut events) = attach(&stream);
    assert_ok!(stream.connect(&target, TIMEOUT, &SecuritySettings::plain()).await);
    assert!(stream.trust_info().is_empty());

    assert_ok!(stream.write(b"hello", &|| false).await);

    let mut notifications = 0;
    let mut received = Vec::new();
    while received.len() < 5 {
        assert_eq!(next_event(&mut events).await, Event::NewBytes);
        notifications += 1;
        if let Some(bytes) = stream.read() {
            received.extend_from_slice(&bytes);
        }
    }
    assert_eq!(received, b"abcde");
    assert!(notifications >= 2);
    assert!(stream.read().is_none());

    let (request, _socket) = server.await.unwrap();
    assert_eq!(&request, b"hello");
    stream.cleanup();
    stream.cleanup();
    assert!(matches!(
        stream.write(b"late", &|| false).await,
        Err(Error::NoConnection)
    ));

    let (listener, target) = local_listener().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"again").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    assert_ok!(stream.connect(&target, TIMEOUT, &SecuritySettings::plain()).await);
    assert_eq!(read_exactly(&stream, &mut events, 5).await, b"again");
}

#[tokio::test]
async fn single_read_drains_both_chunks() {
    let (listener, target) = local_listener().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 5];
        socket.read_exact(&mut request).await.unwrap();
        socket.write_all(&request[..3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        socket.write_all(&request[3..]).await.unwrap();
        socket
    });

    let stream = NetworkStream::new();
    let (_delegate, mut events) = attach(&stream);
    assert_ok!(stream.connect(&target, TIMEOUT, &SecuritySettings::plain()).await);
    assert_ok!(stream.write(b"abcde", &|| false).await);

    assert_eq!(next_event(&mut events).await, Event::NewBytes);
    assert_eq!(next_event(&mut events).await, Event::NewBytes);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());

    assert_eq!(stream.read().as_deref(), Some(&b"abcde"[..]));
    assert!(stream.read().is_none());

    let _socket = server.await.unwrap();
    stream.cleanup();
}

#[tokio::test]
async fn cleanup_during_connect_discards_the_connection() {
    let cert = localhost_cert();
    let (listener, target) = local_listener().await;
    let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
    let (proceed_tx, proceed_rx) = tokio::sync::oneshot::channel::<()>();
    let acceptor = cert.acceptor.clone();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(());
        // Hold the handshake until the client has been cleaned up.
        let _ = proceed_rx.await;
        if let Ok(mut tls) = acceptor.accept(socket).await {
            let mut buf = [0u8; 16];
            let _ = tls.read(&mut buf).await;
        }
    });

    let stream = Arc::new(NetworkStream::new());
    let security = SecuritySettings::tls()
        .server_name("localhost")
        .add_root_certificate(cert.der.clone());
    let connecting = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.connect(&target, TIMEOUT, &security).await })
    };

    tokio::time::timeout(TIMEOUT, accepted_rx)
        .await
        .expect("server never accepted")
        .unwrap();
    stream.cleanup();
    proceed_tx.send(()).unwrap();

    let result = tokio::time::timeout(TIMEOUT, connecting)
        .await
        .expect("connect did not return")
        .unwrap();
    assert!(matches!(result, Err(Error::NoConnection)));
    assert!(!stream.is_connected());
    assert!(stream.trust_info().is_empty());
}

#[tokio::test]
async fn peer_close_is_reported_without_error() {
    let (listener, target) = local_listener().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"bye").await.unwrap();
    });

    let stream = NetworkStream::new();
    let (_delegate, mut events) = attach(&stream);
    assert_ok!(stream.connect(&target, TIMEOUT, &SecuritySettings::plain()).await);

    assert_eq!(next_event(&mut events).await, Event::NewBytes);
    assert_eq!(next_event(&mut events).await, Event::Closed);
    assert_eq!(stream.read().as_deref(), Some(&b"bye"[..]));
}

#[tokio::test]
async fn unreachable_endpoint_fails_as_transport_error() {
    let (listener, target) = local_listener().await;
    drop(listener);

    let stream = NetworkStream::new();
    let error = stream
        .connect(&target, TIMEOUT, &SecuritySettings::plain())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Io(_)));
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(!stream.is_connected());
    assert!(matches!(
        stream.write(b"x", &|| false).await,
        Err(Error::NoConnection)
    ));
}

#[tokio::test]
async fn invalid_targets_fail_before_any_io() {
    let stream = NetworkStream::new();

    let error = stream
        .connect(&ConnectTarget::new("127.0.0.1", 70_000), TIMEOUT, &SecuritySettings::plain())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidPort(70_000)));
    assert_eq!(error.kind(), ErrorKind::Configuration);

    let error = stream
        .connect(&ConnectTarget::new("  ", 80), TIMEOUT, &SecuritySettings::plain())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidHost));
}

#[tokio::test]
async fn tls_with_extra_root_exposes_trust_info() {
    let cert = localhost_cert();
    let (listener, target) = local_listener().await;
    spawn_tls_echo(listener, cert.acceptor.clone());

    let stream = NetworkStream::new();
    let (_delegate, mut events) = attach(&stream);
    let security = SecuritySettings::tls()
        .server_name("localhost")
        .add_root_certificate(cert.der.clone());
    assert_ok!(stream.connect(&target, TIMEOUT, &security).await);

    let trust = stream.trust_info();
    assert_eq!(trust.domain.as_deref(), Some("localhost"));
    assert_eq!(trust.certificates, vec![cert.der.clone()]);

    assert_ok!(stream.write(b"secure ping", &|| false).await);
    assert_eq!(read_exactly(&stream, &mut events, 11).await, b"secure ping");

    stream.cleanup();
    assert!(stream.trust_info().is_empty());
}

#[tokio::test]
async fn tls_with_ca_file() {
    let cert = localhost_cert();
    let mut ca_file = tempfile::NamedTempFile::new().unwrap();
    ca_file.write_all(cert.pem.as_bytes()).unwrap();

    let (listener, target) = local_listener().await;
    spawn_tls_echo(listener, cert.acceptor.clone());

    let stream = NetworkStream::new();
    let (_delegate, mut events) = attach(&stream);
    let security = SecuritySettings::tls()
        .server_name("localhost")
        .ca_file(ca_file.path());
    assert_ok!(stream.connect(&target, TIMEOUT, &security).await);

    assert_ok!(stream.write(b"pem", &|| false).await);
    assert_eq!(read_exactly(&stream, &mut events, 3).await, b"pem");
}

#[tokio::test]
async fn tls_untrusted_certificate_is_rejected() {
    let cert = localhost_cert();
    let (listener, target) = local_listener().await;
    spawn_tls_echo(listener, cert.acceptor.clone());

    let stream = NetworkStream::new();
    let security = SecuritySettings::tls().server_name("localhost");
    let result = stream.connect(&target, TIMEOUT, &security).await;

    assert!(matches!(result, Err(Error::Tls(TlsError::Handshake(_)))));
    assert!(!stream.is_connected());
}

#[tokio::test]
async fn tls_deferred_trust_leaves_judgement_to_caller() {
    let cert = localhost_cert();
    let (listener, target) = local_listener().await;
    spawn_tls_echo(listener, cert.acceptor.clone());

    let stream = NetworkStream::new();
    let security = SecuritySettings::tls()
        .server_name("localhost")
        .trust_mode(TrustMode::Deferred);
    assert_ok!(stream.connect(&target, TIMEOUT, &security).await);

    let trust = stream.trust_info();
    assert_eq!(trust.certificates.first(), Some(&cert.der));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_writes_arrive_in_order() {
    let (listener, target) = local_listener().await;
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let stream = Arc::new(NetworkStream::new());
    assert_ok!(stream.connect(&target, TIMEOUT, &SecuritySettings::plain()).await);

    let queue = OperationQueue::serial(Handle::current());
    let write_op = |payload: &'static [u8]| {
        let stream = stream.clone();
        AsyncFinishOperation::from_future(Handle::current(), move |probe| async move {
            let _ = stream.write(payload, &move || probe.is_cancelled()).await;
        })
    };

    let skipped = write_op(b"skipped");
    skipped.cancel();

    queue.add_operation(write_op(b"one,"));
    queue.add_operation(skipped);
    queue.add_operation(write_op(b"two,"));
    queue.add_operation(write_op(b"three"));

    tokio::time::timeout(TIMEOUT, queue.wait_until_all_finished())
        .await
        .expect("queue did not drain");
    stream.cleanup();

    let received = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(received, b"one,two,three");
}
