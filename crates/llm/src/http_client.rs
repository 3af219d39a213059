//! HTTP Client Factory
//!
//! Builds the `reqwest` client a gateway keeps for its lifetime.

use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a `reqwest::Client` for one provider.
///
/// - `Some(proxy)` -> route every request through it (`http`, `https` or `socks5`)
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(proxy: Option<&str>) -> GatewayResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    match proxy {
        Some(url) => {
            let p = reqwest::Proxy::all(url)
                .map_err(|e| GatewayError::config(format!("invalid proxy URL {}: {}", url, e)))?;
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder
        .build()
        .map_err(|e| GatewayError::config(format!("failed to build HTTP client: {}", e)))
}
