use std::sync::OnceLock;

/// Select the ring CryptoProvider for rustls 0.23 once per process.
///
/// With more than one provider feature enabled in the dependency graph rustls cannot pick a
/// default and panics on the first TLS handshake.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Err means another provider was installed first, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
