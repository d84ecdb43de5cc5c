// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Once;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the HTTP client used for authentication requests.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    ensure_crypto();
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(client)
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
