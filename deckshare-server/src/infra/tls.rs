use std::path::Path;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;

/// Load a PEM certificate chain and private key for the HTTPS listener.
pub async fn load_rustls(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert, key).await.with_context(|| {
        format!(
            "failed to load TLS material from {} and {}",
            cert.display(),
            key.display()
        )
    })
}
