// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Certificate generation and provisioning
//!
//! Devices share one TLS identity. It is either supplied by the host
//! application or generated once (self-signed) by the [`CertificateProvisioner`]
//! owned by the server.

use crate::ServerError;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Common name of generated certificates
pub const SELF_SIGNED_COMMON_NAME: &str = "naps2-escl-server";

/// Validity of generated certificates (about ten years)
const SELF_SIGNED_VALIDITY_DAYS: i64 = 3650;

/// Certificate fingerprint (SPKI SHA-256)
///
/// The SHA-256 hash of the SubjectPublicKeyInfo, logged so that users can
/// recognise the identity their clients are asked to trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Calculate fingerprint from DER-encoded certificate
    ///
    /// Only the SPKI bytes are hashed, not the whole certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn from_der_cert(cert_der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| anyhow::anyhow!("Failed to parse X.509 certificate: {e}"))?;

        let mut hasher = Sha256::new();
        hasher.update(cert.public_key().raw);
        let result = hasher.finalize();

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&result);
        Ok(Self(arr))
    }

    /// Raw digest bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Base64 encoding
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

/// Where a certificate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateOrigin {
    /// Supplied by the host application
    Supplied,
    /// Generated locally; never counts as trusted
    SelfSigned,
}

/// Certificate and private key pair
///
/// Stores certificate and key as DER-encoded bytes (key in PKCS#8).
#[derive(Clone)]
pub struct CertificateKey {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub origin: CertificateOrigin,
}

impl CertificateKey {
    /// Generate a new self-signed certificate
    ///
    /// - Algorithm: ECDSA with secp256r1 (P-256)
    /// - Validity: ten years from yesterday
    /// - Key usage: digital signature + key encipherment, EKU server auth
    /// - Subject CN: `common_name`, SANs: `common_name` and `localhost`
    pub fn generate_self_signed(common_name: &str) -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate().context("Failed to generate key pair")?;
        let key_der = key_pair.serialize_der();

        let mut params =
            rcgen::CertificateParams::new(vec![common_name.to_string(), "localhost".to_string()])
                .context("Failed to create certificate parameters")?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(SELF_SIGNED_VALIDITY_DAYS);

        params.key_usages = vec![
            rcgen::KeyUsagePurpose::DigitalSignature,
            rcgen::KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let cert = params
            .self_signed(&key_pair)
            .context("Failed to self-sign certificate")?;
        let cert_der = cert.der().to_vec();

        let fingerprint =
            Fingerprint::from_der_cert(&cert_der).context("Failed to calculate fingerprint")?;

        Ok(Self {
            cert_der,
            key_der,
            fingerprint,
            origin: CertificateOrigin::SelfSigned,
        })
    }

    /// Parse a host-supplied certificate and private key from PEM text
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let cert_der = pem::parse(cert_pem)
            .context("Failed to parse certificate PEM")?
            .contents()
            .to_vec();

        let key_pair = rcgen::KeyPair::from_pem(key_pem).context("Failed to parse private key")?;
        let key_der = key_pair.serialize_der();

        let fingerprint =
            Fingerprint::from_der_cert(&cert_der).context("Failed to calculate fingerprint")?;

        Ok(Self {
            cert_der,
            key_der,
            fingerprint,
            origin: CertificateOrigin::Supplied,
        })
    }

    /// Load a host-supplied certificate from PEM files
    pub fn load_from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)
            .with_context(|| format!("Failed to read certificate from {}", cert_path.display()))?;

        let key_pem = std::fs::read_to_string(key_path)
            .with_context(|| format!("Failed to read private key from {}", key_path.display()))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Save certificate to PEM files
    ///
    /// Saves cert.pem and key.pem to the specified directory
    pub fn save_to_pem(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");

        let cert_pem = pem::encode(&pem::Pem::new("CERTIFICATE", self.cert_der.clone()));
        // The key is in PKCS#8 format, which uses the "PRIVATE KEY" tag
        let key_pem = pem::encode(&pem::Pem::new("PRIVATE KEY", self.key_der.clone()));

        std::fs::write(&cert_path, cert_pem)
            .with_context(|| format!("Failed to write certificate to {}", cert_path.display()))?;

        std::fs::write(&key_path, key_pem)
            .with_context(|| format!("Failed to write private key to {}", key_path.display()))?;

        Ok(())
    }

    /// Build a rustls server configuration for this identity
    ///
    /// The ring provider is passed explicitly instead of relying on a
    /// process-wide default.
    pub fn rustls_server_config(&self) -> Result<rustls::ServerConfig, ServerError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ServerError::Tls(format!("Unsupported protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(self.cert_der.clone())],
                PrivateKeyDer::Pkcs8(self.key_der.clone().into()),
            )
            .map_err(|e| ServerError::Tls(format!("Failed to create TLS config: {e}")))?;

        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl fmt::Debug for CertificateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateKey")
            .field("fingerprint", &self.fingerprint.to_hex())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

type Generator = dyn Fn() -> Result<CertificateKey> + Send + Sync;

/// Obtains the TLS identity shared by all devices
///
/// Self-signed generation runs at most once per provisioner; the outcome
/// (including a failure) is cached and reused by every later call.
pub struct CertificateProvisioner {
    generator: Box<Generator>,
    generated: OnceCell<Option<Arc<CertificateKey>>>,
}

impl CertificateProvisioner {
    /// Provisioner generating [`SELF_SIGNED_COMMON_NAME`] certificates
    pub fn new() -> Self {
        Self::with_generator(|| CertificateKey::generate_self_signed(SELF_SIGNED_COMMON_NAME))
    }

    /// Provisioner with a custom generation step
    pub fn with_generator(
        generator: impl Fn() -> Result<CertificateKey> + Send + Sync + 'static,
    ) -> Self {
        Self {
            generator: Box::new(generator),
            generated: OnceCell::new(),
        }
    }

    /// Return `existing` unchanged, otherwise the generated certificate
    ///
    /// Never fails: a generation error is logged and yields `None`, since TLS
    /// may be optional under the active policy.
    pub async fn get_or_create(
        &self,
        existing: Option<&Arc<CertificateKey>>,
    ) -> Option<Arc<CertificateKey>> {
        if let Some(existing) = existing {
            return Some(Arc::clone(existing));
        }

        self.generated
            .get_or_init(|| async {
                match (self.generator)() {
                    Ok(cert) => {
                        info!(
                            fingerprint = %cert.fingerprint.to_hex(),
                            "Generated self-signed certificate"
                        );
                        Some(Arc::new(cert))
                    }
                    Err(e) => {
                        warn!("Failed to generate self-signed certificate: {e:#}");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

impl Default for CertificateProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_generate_self_signed() {
        let cert = CertificateKey::generate_self_signed("test-server").unwrap();
        assert_eq!(cert.origin, CertificateOrigin::SelfSigned);
        assert!(!cert.cert_der.is_empty());
        assert!(!cert.key_der.is_empty());
        assert_eq!(cert.fingerprint.to_hex().len(), 64);
    }

    #[test]
    fn test_generated_certificate_fields() {
        use x509_parser::prelude::*;

        let cert = CertificateKey::generate_self_signed("test-server").unwrap();
        let (_, x509) = X509Certificate::from_der(&cert.cert_der).unwrap();

        let cn = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        assert_eq!(cn, Some("test-server"));

        let validity = x509.validity();
        let days = (validity.not_after.timestamp() - validity.not_before.timestamp()) / 86_400;
        assert!(days >= SELF_SIGNED_VALIDITY_DAYS);

        let key_usage = x509.key_usage().unwrap().unwrap().value;
        assert!(key_usage.key_encipherment());
        assert!(key_usage.digital_signature());
    }

    #[test]
    fn test_pem_roundtrip_marks_supplied() {
        let dir = tempfile::TempDir::new().unwrap();
        let original = CertificateKey::generate_self_signed("test-server").unwrap();
        original.save_to_pem(dir.path()).unwrap();

        let loaded = CertificateKey::load_from_pem_files(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
        )
        .unwrap();

        assert_eq!(loaded.origin, CertificateOrigin::Supplied);
        assert_eq!(loaded.fingerprint, original.fingerprint);
        assert_eq!(loaded.cert_der, original.cert_der);
    }

    #[test]
    fn test_load_missing_files_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = CertificateKey::load_from_pem_files(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rustls_server_config() {
        let cert = CertificateKey::generate_self_signed("test-server").unwrap();
        let config = cert.rustls_server_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn test_provisioner_returns_existing_unchanged() {
        let provisioner = CertificateProvisioner::with_generator(|| {
            anyhow::bail!("generator must not run")
        });
        let existing = Arc::new(CertificateKey::generate_self_signed("supplied").unwrap());

        let result = provisioner.get_or_create(Some(&existing)).await.unwrap();
        assert!(Arc::ptr_eq(&result, &existing));
    }

    #[tokio::test]
    async fn test_provisioner_generates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provisioner = CertificateProvisioner::with_generator(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            CertificateKey::generate_self_signed("test")
        });

        let first = provisioner.get_or_create(None).await.unwrap();
        let second = provisioner.get_or_create(None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provisioner_failure_yields_none() {
        let provisioner =
            CertificateProvisioner::with_generator(|| anyhow::bail!("no crypto available"));
        assert!(provisioner.get_or_create(None).await.is_none());
        assert!(provisioner.get_or_create(None).await.is_none());
    }
}
