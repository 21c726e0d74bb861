use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use tracing::info;
use wtransport::Identity;

use crate::config::ServerConfig;

const DEV_CERT_DIR: &str = "certs";
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// Browsers only pin certificate hashes for certificates valid at most 14 days
const DEV_CERT_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for WebTransport server
pub struct TlsConfig {
    /// The wtransport Identity containing certificate and key
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for browser flag)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load TLS configuration
    ///
    /// Production: TLS_CERT_PATH and TLS_KEY_PATH in the server config.
    /// Development: certs/, generated on first start when missing.
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        if !(Path::new(DEV_CERT_FILE).exists() && Path::new(DEV_KEY_FILE).exists()) {
            info!("No certificate in {}/, generating one for localhost", DEV_CERT_DIR);
            generate_dev_cert(Path::new(DEV_CERT_DIR)).await?;
        }
        Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
    }

    /// Load certificate from PEM file paths
    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;

        let cert_hash = compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }
}

fn compute_cert_hash(identity: &Identity) -> String {
    identity
        .certificate_chain()
        .as_slice()
        .first()
        .map(|cert| STANDARD.encode(digest(&SHA256, cert.der()).as_ref()))
        .unwrap_or_default()
}

/// Write a self-signed localhost certificate and key into `dir`
async fn generate_dev_cert(dir: &Path) -> Result<()> {
    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Spider Arena Dev");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + DEV_CERT_VALIDITY).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(dir.join("cert.pem"), cert.pem()).await?;
    tokio::fs::write(dir.join("key.pem"), key_pair.serialize_pem()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("spider-arena-{}-{}", tag, std::process::id()))
    }

    #[tokio::test]
    async fn test_generated_cert_loads() {
        let dir = temp_dir("cert");
        generate_dev_cert(&dir).await.unwrap();

        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        let tls = TlsConfig::load_from_paths(cert.to_str().unwrap(), key.to_str().unwrap())
            .await
            .unwrap();

        // SHA-256 digest, base64 encoded
        assert_eq!(STANDARD.decode(&tls.cert_hash).unwrap().len(), 32);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_missing_configured_cert_is_error() {
        let config = ServerConfig {
            tls_cert_path: Some("/nonexistent/cert.pem".to_string()),
            tls_key_path: Some("/nonexistent/key.pem".to_string()),
            ..ServerConfig::default()
        };
        assert!(TlsConfig::load(&config).await.is_err());
    }
}
