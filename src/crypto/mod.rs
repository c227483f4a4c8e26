/// Cryptographic provider selection and TLS configuration
use rustls::crypto::CryptoProvider;
use std::sync::Arc;

pub mod tls;

#[cfg(not(any(feature = "ring-crypto", feature = "aws-lc-crypto")))]
compile_error!("enable one of the `ring-crypto` or `aws-lc-crypto` features");

/// Crypto provider used for every TLS session
///
/// If both features are enabled, ring is preferred (for CI --all-features).
pub fn crypto_provider() -> Arc<CryptoProvider> {
    #[cfg(feature = "ring-crypto")]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    #[cfg(all(feature = "aws-lc-crypto", not(feature = "ring-crypto")))]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
}
