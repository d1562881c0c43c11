//! # Address Resolution
//!
//! Locators are opaque to the cache; an [`AddressResolver`] turns one into an
//! address the [`Fetcher`](crate::Fetcher) can request.

use url::Url;

const MXC_SCHEME: &str = "mxc://";
const DOWNLOAD_PATH: &str = "_matrix/media/v3/download";

pub trait AddressResolver: Send + Sync {
    /// `None` when the locator cannot be turned into a fetchable address
    fn resolve(&self, locator: &str) -> Option<Url>;
}

fn parse_http_url(locator: &str) -> Option<Url> {
    let url = Url::parse(locator).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

/// Accepts only absolute `http(s)` locators, unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectUrlResolver;

impl AddressResolver for DirectUrlResolver {
    fn resolve(&self, locator: &str) -> Option<Url> {
        parse_http_url(locator)
    }
}

/// Resolves `mxc://<server>/<media-id>` content URIs against a homeserver's
/// media download endpoint. Plain `http(s)` locators pass through.
#[derive(Debug, Clone)]
pub struct ContentUrlResolver {
    homeserver: Url,
}

impl ContentUrlResolver {
    pub fn new(homeserver: Url) -> Self {
        Self { homeserver }
    }

    pub fn homeserver(&self) -> &Url {
        &self.homeserver
    }
}

impl AddressResolver for ContentUrlResolver {
    fn resolve(&self, locator: &str) -> Option<Url> {
        let Some(rest) = locator.strip_prefix(MXC_SCHEME) else {
            return parse_http_url(locator);
        };

        // Fragments carry client-side hints only
        let rest = rest.split('#').next().unwrap_or_default();
        let (server, media_id) = rest.split_once('/')?;
        if server.is_empty() || media_id.is_empty() || media_id.contains('/') {
            return None;
        }

        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(DOWNLOAD_PATH.split('/'))
            .push(server)
            .push(media_id);
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(homeserver: &str) -> ContentUrlResolver {
        ContentUrlResolver::new(Url::parse(homeserver).unwrap())
    }

    #[test]
    fn test_mxc_resolves_to_download_endpoint() {
        let url = resolver("https://matrix.example.org")
            .resolve("mxc://server/abc123")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/media/v3/download/server/abc123"
        );
    }

    #[test]
    fn test_homeserver_path_prefix_is_kept() {
        let url = resolver("https://host.example/matrix/")
            .resolve("mxc://server/abc123#auto")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://host.example/matrix/_matrix/media/v3/download/server/abc123"
        );
    }

    #[test]
    fn test_http_locator_passes_through() {
        let r = resolver("https://matrix.example.org");
        let url = r.resolve("https://cdn.example.org/file.png").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.org/file.png");
    }

    #[test]
    fn test_malformed_locators_do_not_resolve() {
        let r = resolver("https://matrix.example.org");
        assert!(r.resolve("mxc://server").is_none());
        assert!(r.resolve("mxc:///abc").is_none());
        assert!(r.resolve("mxc://server/").is_none());
        assert!(r.resolve("mxc://server/a/b").is_none());
        assert!(r.resolve("ftp://server/file").is_none());
        assert!(r.resolve("not a url").is_none());
    }

    #[test]
    fn test_direct_resolver() {
        assert!(DirectUrlResolver.resolve("https://a.example/x").is_some());
        assert!(DirectUrlResolver.resolve("mxc://server/abc").is_none());
    }
}
