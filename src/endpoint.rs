//! Primus endpoint resolution.
//!
//! Primus servers accept websocket upgrades on a fixed path (usually
//! `/primus`), and clients append a `_primuscb` cache-busting query parameter
//! to every request.
//!
//! This module turns a base server URL into that websocket URL.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::FeathersError;

/// Query parameter Primus uses for cache busting.
pub const CACHE_BUSTER_PARAM: &str = "_primuscb";

const YEAST_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

/// Builds the websocket URL for a Primus server.
///
/// # Arguments
///
/// * `base` - The server URL (e.g., `https://api.ezdevice.net`).
/// * `config` - Supplies the pathname and whether to add a cache buster.
///
/// # Returns
///
/// * `Ok(url)` - A `ws://` or `wss://` URL ending in the Primus pathname.
/// * `Err(FeathersError)` - If the scheme cannot carry a websocket.
///
/// # Example
///
/// ```
/// use feathers_primus::{ClientConfig, endpoint::primus_url};
/// use url::Url;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig { cache_buster: false, ..ClientConfig::default() };
/// let url = primus_url(&Url::parse("https://api.ezdevice.net")?, &config)?;
/// assert_eq!(url.as_str(), "wss://api.ezdevice.net/primus");
/// # Ok(())
/// # }
/// ```
pub fn primus_url(base: &Url, config: &ClientConfig) -> Result<Url, FeathersError> {
    let mut url = base.clone();

    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(FeathersError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| FeathersError::UnsupportedScheme(base.scheme().to_string()))?;

    let pathname = config.pathname.trim_end_matches('/');
    if !pathname.is_empty() {
        let mut path = url.path().trim_end_matches('/').to_string();
        let pathname = pathname.strip_prefix('/').unwrap_or(pathname);
        if !path.ends_with(&format!("/{pathname}")) {
            path.push('/');
            path.push_str(pathname);
            url.set_path(&path);
        }
    }

    url.set_fragment(None);

    if config.cache_buster && !url.query_pairs().any(|(key, _)| key == CACHE_BUSTER_PARAM) {
        url.query_pairs_mut()
            .append_pair(CACHE_BUSTER_PARAM, &cache_buster());
    }

    debug!("Primus URL: {}", url);
    Ok(url)
}

/// Generates a cache-buster token: the current time in milliseconds,
/// encoded in the 64-character yeast alphabet.
#[must_use]
pub fn cache_buster() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    encode_yeast(millis)
}

fn encode_yeast(mut n: u64) -> String {
    let mut out = Vec::new();
    loop {
        out.push(YEAST_ALPHABET[(n % 64) as usize]);
        n /= 64;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_buster() -> ClientConfig {
        ClientConfig {
            cache_buster: false,
            ..ClientConfig::default()
        }
    }

    fn resolve(base: &str, config: &ClientConfig) -> Result<Url, FeathersError> {
        primus_url(&Url::parse(base).unwrap(), config)
    }

    #[test]
    fn test_scheme_mapping() {
        let config = no_buster();
        assert_eq!(
            resolve("http://localhost:3030", &config).unwrap().as_str(),
            "ws://localhost:3030/primus"
        );
        assert_eq!(
            resolve("https://api.ezdevice.net/", &config).unwrap().as_str(),
            "wss://api.ezdevice.net/primus"
        );
        assert_eq!(
            resolve("wss://api.ezdevice.net/primus", &config).unwrap().as_str(),
            "wss://api.ezdevice.net/primus"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = resolve("ftp://example.com", &no_buster()).unwrap_err();
        assert!(matches!(err, FeathersError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn test_nested_path_and_fragment() {
        let url = resolve("https://example.com/api/#top", &no_buster()).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/api/primus");
    }

    #[test]
    fn test_empty_pathname_keeps_path() {
        let config = ClientConfig {
            pathname: String::new(),
            ..no_buster()
        };
        let url = resolve("ws://example.com/socket", &config).unwrap();
        assert_eq!(url.as_str(), "ws://example.com/socket");
    }

    #[test]
    fn test_cache_buster_added_once() {
        let config = ClientConfig::default();
        let url = resolve("http://localhost:3030", &config).unwrap();
        let busters: Vec<_> = url
            .query_pairs()
            .filter(|(key, _)| key == CACHE_BUSTER_PARAM)
            .collect();
        assert_eq!(busters.len(), 1);
        assert!(!busters[0].1.is_empty());

        let url = resolve("ws://localhost:3030/primus?_primuscb=McnNBFM", &config).unwrap();
        assert_eq!(url.query(), Some("_primuscb=McnNBFM"));
    }

    #[test]
    fn test_encode_yeast() {
        assert_eq!(encode_yeast(0), "0");
        assert_eq!(encode_yeast(63), "_");
        assert_eq!(encode_yeast(64), "10");
        assert_eq!(encode_yeast(64 * 64 + 10), "10A");
    }
}
