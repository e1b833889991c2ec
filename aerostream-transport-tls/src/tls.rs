//! TLS security layer for AeroStream
//!
//! Builds rustls client configurations from [`SecuritySettings`] and runs the
//! client handshake over any connected byte stream.

use aerostream_core::config::{SecuritySettings, TrustMode};
use aerostream_core::error::TlsError;
use aerostream_core::transport::TrustInfo;
use aerostream_core::Result;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Client side of a negotiated TLS session
pub type TlsClientStream<S> = tokio_rustls::client::TlsStream<S>;

/// Create a client config for the given settings
///
/// Trust anchors are the webpki roots plus any roots from the settings.
pub fn client_config(settings: &SecuritySettings) -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    for der in &settings.root_certificates {
        add_root(&mut root_store, der)?;
    }

    if let Some(path) = &settings.ca_file {
        for der in load_pem_certificates(path)? {
            add_root(&mut root_store, &der)?;
        }
    }

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if settings.trust_mode == TrustMode::Deferred {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(DeferredTrust));
    }

    Ok(Arc::new(config))
}

fn add_root(store: &mut RootCertStore, der: &[u8]) -> Result<()> {
    store
        .add(&Certificate(der.to_vec()))
        .map_err(|e| TlsError::Certificate(e.to_string()))?;
    Ok(())
}

fn load_pem_certificates(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path)
        .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "{}: no certificates found",
            path.display()
        ))
        .into());
    }
    Ok(certs)
}

/// Accepts any chain during the handshake; judgement is left to whoever
/// inspects the [`TrustInfo`] afterwards.
struct DeferredTrust;

impl ServerCertVerifier for DeferredTrust {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Run the client handshake over `stream`
///
/// The server name comes from the settings, falling back to `host`.
/// Returns the encrypted stream and the evidence the peer presented.
pub async fn negotiate<S>(
    stream: S,
    host: &str,
    settings: &SecuritySettings,
) -> Result<(TlsClientStream<S>, TrustInfo)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = settings.server_name.as_deref().unwrap_or(host);
    let server_name =
        ServerName::try_from(name).map_err(|_| TlsError::InvalidServerName(name.to_string()))?;

    let connector = TlsConnector::from(client_config(settings)?);
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| TlsError::Handshake(e.to_string()))?;

    let info = trust_info(&tls_stream, name);
    debug!(
        server_name = name,
        certificates = info.certificates.len(),
        "TLS negotiated"
    );
    Ok((tls_stream, info))
}

fn trust_info<S>(stream: &TlsClientStream<S>, domain: &str) -> TrustInfo {
    let certificates = stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|chain| chain.iter().map(|cert| cert.0.clone()).collect())
        .unwrap_or_default();

    TrustInfo {
        certificates,
        domain: Some(domain.to_string()),
    }
}
