// Downloaded cluster credentials: TLS material plus the connection scripts
// needed to point docker/kubectl at a cluster.
//
// A bundle on disk is never trusted as-is. `verify` rebuilds a TLS client
// configuration from the bundle and performs a live handshake against the
// host named in the bundle's own connection script; any failure means the
// bundle should be thrown away and re-downloaded.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use url::Url;

pub const CA_FILE: &str = "ca.pem";
pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

const DOCKER_ENV_FILE: &str = "docker.env";
const KUBECONFIG_FILE: &str = "kubectl.config";

const VERIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// A set of named file contents needed to reach a cluster directly.
#[derive(Debug, Clone, Default)]
pub struct CredentialsBundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl CredentialsBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_text_files(files: BTreeMap<String, String>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(name, contents)| (name, contents.into_bytes()))
                .collect(),
        }
    }

    /// Load whatever files are present in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|err| {
            Error::InvalidBundle(format!("cannot list files in {}: {err}", dir.display()))
        })?;

        let mut bundle = Self::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::InvalidBundle(format!("cannot list files in {}: {err}", dir.display()))
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = fs::read(&path).map_err(|err| {
                Error::InvalidBundle(format!("cannot read {}: {err}", path.display()))
            })?;
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                bundle.files.insert(name.to_string(), contents);
            }
        }

        Ok(bundle)
    }

    /// Write the bundle out, one file per entry, keeping key material
    /// private to the user.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for (name, contents) in &self.files {
            let path = dir.join(name);
            fs::write(&path, contents)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: Vec<u8>) {
        self.files.insert(name.into(), contents);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn ca(&self) -> &[u8] {
        self.get(CA_FILE).unwrap_or_default()
    }

    pub fn cert(&self) -> &[u8] {
        self.get(CERT_FILE).unwrap_or_default()
    }

    pub fn key(&self) -> &[u8] {
        self.get(KEY_FILE).unwrap_or_default()
    }

    /// Validate that the bundle can actually reach the host it describes.
    ///
    /// Chain verification is deliberately off for the probe itself; the
    /// bundle's CA *is* the cluster's private CA, and the point is
    /// reachability plus client-certificate acceptance.
    pub async fn verify(&self) -> Result<()> {
        tracing::debug!("Verifying credentials bundle...");

        let tls_config = self.tls_config()?;
        let (host, port) = self.parse_host()?;

        handshake(&host, port, tls_config).await
    }

    fn tls_config(&self) -> Result<rustls::ClientConfig> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut self.cert())
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| Error::InvalidBundle(format!("unable to parse {CERT_FILE}: {err}")))?;
        if certs.is_empty() {
            return Err(Error::InvalidBundle(format!(
                "no certificate found in {CERT_FILE}"
            )));
        }

        let key = rustls_pemfile::private_key(&mut self.key())
            .map_err(|err| Error::InvalidBundle(format!("unable to parse {KEY_FILE}: {err}")))?
            .ok_or_else(|| {
                Error::InvalidBundle(format!("no private key found in {KEY_FILE}"))
            })?;

        let provider = Arc::new(ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|err| Error::VerificationFailed(err.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_client_auth_cert(certs, key)
            .map_err(|err| Error::InvalidBundle(format!("key pair mismatch: {err}")))?;

        Ok(config)
    }

    /// Pull the target host out of the bundle's own connection script.
    fn parse_host(&self) -> Result<(String, u16)> {
        let raw = if let Some(env) = self.get(DOCKER_ENV_FILE) {
            extract_value(env, "DOCKER_HOST=").ok_or_else(|| {
                Error::InvalidBundle(format!(
                    "could not parse DOCKER_HOST from {DOCKER_ENV_FILE}"
                ))
            })?
        } else if let Some(config) = self.get(KUBECONFIG_FILE) {
            extract_value(config, "server:").ok_or_else(|| {
                Error::InvalidBundle(format!("could not parse server from {KUBECONFIG_FILE}"))
            })?
        } else {
            return Err(Error::InvalidBundle(format!(
                "missing both {DOCKER_ENV_FILE} and {KUBECONFIG_FILE}"
            )));
        };

        let url = Url::parse(&raw)
            .map_err(|_| Error::InvalidBundle(format!("bad host URL {raw}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidBundle(format!("bad host URL {raw}")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidBundle(format!("no port in host URL {raw}")))?;

        Ok((host, port))
    }
}

fn extract_value(contents: &[u8], token: &str) -> Option<String> {
    let text = String::from_utf8_lossy(contents);
    for line in text.lines() {
        if let Some((_, rest)) = line.split_once(token) {
            return Some(rest.trim().to_string());
        }
    }
    None
}

async fn handshake(host: &str, port: u16, config: rustls::ClientConfig) -> Result<()> {
    let addr = format!("{host}:{port}");
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::InvalidBundle(format!("bad host name {host}")))?;
    let connector = TlsConnector::from(Arc::new(config));

    let connect = async {
        let stream = tokio::net::TcpStream::connect(&addr).await?;
        connector.connect(server_name, stream).await?;
        Ok::<_, std::io::Error>(())
    };

    match tokio::time::timeout(VERIFY_TIMEOUT, connect).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::VerificationFailed(format!(
            "unable to connect to {addr}: {err}"
        ))),
        Err(_) => Err(Error::VerificationFailed(format!(
            "timed out connecting to {addr}"
        ))),
    }
}

/// Accepts whatever certificate the cluster presents; signatures are still
/// checked so the probe exercises the real TLS stack.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer;
    use tokio_rustls::TlsAcceptor;

    fn bundle_with(files: &[(&str, &str)]) -> CredentialsBundle {
        let mut bundle = CredentialsBundle::new();
        for (name, contents) in files {
            bundle.insert(*name, contents.as_bytes().to_vec());
        }
        bundle
    }

    #[test]
    fn test_parse_host_from_docker_env() {
        let bundle = bundle_with(&[(
            "docker.env",
            "# generated\nexport DOCKER_VERSION=1.11\nexport DOCKER_HOST=tcp://172.99.73.10:2376\n",
        )]);
        assert_eq!(
            bundle.parse_host().unwrap(),
            ("172.99.73.10".to_string(), 2376)
        );
    }

    #[test]
    fn test_parse_host_from_kubeconfig() {
        let bundle = bundle_with(&[(
            "kubectl.config",
            "clusters:\n- cluster:\n    server: https://kube.example.com:6443\n",
        )]);
        assert_eq!(
            bundle.parse_host().unwrap(),
            ("kube.example.com".to_string(), 6443)
        );
    }

    #[test]
    fn test_parse_host_without_descriptor_is_invalid() {
        let bundle = bundle_with(&[("ca.pem", "not relevant")]);
        let err = bundle.parse_host().unwrap_err();
        assert!(matches!(err, Error::InvalidBundle(_)));
    }

    #[test]
    fn test_parse_host_with_garbage_url_is_invalid() {
        let bundle = bundle_with(&[("docker.env", "DOCKER_HOST=::not a url::\n")]);
        assert!(bundle.parse_host().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let bundle = bundle_with(&[("ca.pem", "ca"), ("docker.env", "DOCKER_HOST=tcp://h:1\n")]);
        bundle.save(dir.path()).unwrap();

        let loaded = CredentialsBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.get("ca.pem"), Some("ca".as_bytes()));
        assert_eq!(loaded.ca(), "ca".as_bytes());
    }

    #[test]
    fn test_load_missing_directory_is_invalid() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            CredentialsBundle::load(&missing),
            Err(Error::InvalidBundle(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_accepts_a_live_cluster() {
        let server_cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let client_cert = rcgen::generate_simple_self_signed(vec!["client".to_string()]).unwrap();

        let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![server_cert.cert.der().clone()],
            PrivatePkcs8KeyDer::from(server_cert.key_pair.serialize_der()).into(),
        )
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = acceptor.accept(stream).await;
            }
        });

        let mut bundle = CredentialsBundle::new();
        bundle.insert("ca.pem", server_cert.cert.pem().into_bytes());
        bundle.insert("cert.pem", client_cert.cert.pem().into_bytes());
        bundle.insert("key.pem", client_cert.key_pair.serialize_pem().into_bytes());
        bundle.insert(
            "docker.env",
            format!("export DOCKER_HOST=tcp://127.0.0.1:{port}\n").into_bytes(),
        );

        bundle.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_a_mismatched_keypair() {
        let one = rcgen::generate_simple_self_signed(vec!["client".to_string()]).unwrap();
        let two = rcgen::generate_simple_self_signed(vec!["client".to_string()]).unwrap();

        let mut bundle = CredentialsBundle::new();
        bundle.insert("ca.pem", one.cert.pem().into_bytes());
        bundle.insert("cert.pem", one.cert.pem().into_bytes());
        // The wrong private key for cert.pem.
        bundle.insert("key.pem", two.key_pair.serialize_pem().into_bytes());
        bundle.insert(
            "docker.env",
            "export DOCKER_HOST=tcp://127.0.0.1:1\n".to_string().into_bytes(),
        );

        assert!(bundle.verify().await.is_err());
    }

    #[tokio::test]
    async fn test_verify_reports_unreachable_clusters() {
        let cert = rcgen::generate_simple_self_signed(vec!["client".to_string()]).unwrap();

        let mut bundle = CredentialsBundle::new();
        bundle.insert("ca.pem", cert.cert.pem().into_bytes());
        bundle.insert("cert.pem", cert.cert.pem().into_bytes());
        bundle.insert("key.pem", cert.key_pair.serialize_pem().into_bytes());
        // Nothing listens on port 1.
        bundle.insert(
            "docker.env",
            "export DOCKER_HOST=tcp://127.0.0.1:1\n".to_string().into_bytes(),
        );

        let err = bundle.verify().await.unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)));
    }
}
