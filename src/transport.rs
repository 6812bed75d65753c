// ABOUTME: Transport selection: plain TCP or a QUIC-like reliable stream
// ABOUTME: Grounded on examples/original_source/dial.go's network switch, quinn added per pack convention

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// ALPN protocol literal the original source hard-codes for its QUIC-like
/// transport (dial.go: `NextProtos: []string{"quic-echo-example"}`).
pub const QUIC_ALPN: &str = "quic-echo-example";

pub const QUIC_MAX_IDLE: std::time::Duration = std::time::Duration::from_secs(60);

/// The recognized `network` values at dial/listen (spec.md section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Tcp4,
    /// Selects the QUIC-like reliable-stream transport.
    Udp,
}

impl std::str::FromStr for Network {
    type Err = io::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "udp" => Ok(Network::Udp),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unrecognized network {other:?}"),
            )),
        }
    }
}

/// A duplex byte stream, either a plain TCP socket or a single bidirectional
/// stream on a QUIC-like connection. Both sides of `Conn`/`Connection` only
/// ever need `AsyncRead + AsyncWrite`, so the two are otherwise
/// interchangeable.
pub enum Transport {
    Tcp(TcpStream),
    Quic(QuicStream),
}

/// A single bidirectional stream multiplexed over one `quinn::Connection`.
/// The spec's "QUIC-like reliable datagram stream" maps onto one stream
/// per `Conn`, opened once at dial time.
pub struct QuicStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl QuicStream {
    pub fn new(send: quinn::SendStream, recv: quinn::RecvStream) -> Self {
        QuicStream { send, recv }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Quic(s) => Pin::new(&mut s.recv).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Quic(s) => AsyncWrite::poll_write(Pin::new(&mut s.send), cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Quic(s) => Pin::new(&mut s.send).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Quic(s) => Pin::new(&mut s.send).poll_shutdown(cx),
        }
    }
}

/// Accepts any server certificate, mirroring the original source's
/// `InsecureSkipVerify: true` (dial.go). This is a development default,
/// not a substitute for real certificate validation in production;
/// spec.md section 6 lists it as such.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

/// Builds a `quinn::ClientConfig` matching the original source's QUIC
/// defaults: ALPN `quic-echo-example`, max TLS 1.3, max idle 60s,
/// certificate verification disabled.
pub fn quic_client_config() -> Result<quinn::ClientConfig, Box<dyn std::error::Error + Send + Sync>> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![QUIC_ALPN.as_bytes().to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(QUIC_MAX_IDLE.try_into()?));
    client_config.transport_config(Arc::new(transport));
    Ok(client_config)
}

/// Builds a self-signed `quinn::ServerConfig` for `listen()` over the
/// QUIC-like transport (TLS cert generation itself stays the embedder's
/// responsibility in production; this mirrors the original's dev default).
pub fn quic_server_config() -> Result<quinn::ServerConfig, Box<dyn std::error::Error + Send + Sync>> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    let cert_chain = vec![cert.cert.der().clone()];

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    crypto.alpn_protocols = vec![QUIC_ALPN.as_bytes().to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(QUIC_MAX_IDLE.try_into()?));
    server_config.transport_config(Arc::new(transport));
    Ok(server_config)
}
