//! TLS material for the QUIC endpoint.

use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::NetError;

/// Certificates and trust roots for a node's QUIC endpoint.
///
/// QUIC makes TLS mandatory, so every node carries one of these.
/// Deployments provide shared material via [`TransportSecurity::from_parts`]
/// (one cluster certificate, or per-node certificates under a common
/// CA). [`TransportSecurity::self_signed`] generates an ephemeral
/// identity that trusts only itself — enough for single-process
/// clusters and tests.
#[derive(Clone)]
pub struct TransportSecurity {
    pub(crate) server: iroh_quinn::ServerConfig,
    pub(crate) client: iroh_quinn::ClientConfig,
    pub(crate) server_name: String,
}

impl TransportSecurity {
    /// Generate an ephemeral self-signed identity for `localhost`.
    pub fn self_signed() -> Result<Self, NetError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| NetError::Tls(e.to_string()))?;
        let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());

        let mut roots = rustls::RootCertStore::empty();
        roots
            .add(cert.cert.der().clone())
            .map_err(|e| NetError::Tls(e.to_string()))?;

        Self::from_parts(vec![cert.cert.der().clone()], key, roots, "localhost")
    }

    /// Build from host-provided certificates.
    ///
    /// `cert_chain` and `key` identify this node's listener; `roots`
    /// are the CAs peers' certificates must chain to; `server_name` is
    /// the SNI name used when dialing peers (their certificates must
    /// cover it).
    pub fn from_parts(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        roots: rustls::RootCertStore,
        server_name: impl Into<String>,
    ) -> Result<Self, NetError> {
        let server = iroh_quinn::ServerConfig::with_single_cert(cert_chain, key)
            .map_err(|e| NetError::Tls(e.to_string()))?;
        let client = iroh_quinn::ClientConfig::with_root_certificates(Arc::new(roots))
            .map_err(|e| NetError::Tls(e.to_string()))?;

        Ok(Self {
            server,
            client,
            server_name: server_name.into(),
        })
    }

    /// The SNI name used when dialing peers.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}
