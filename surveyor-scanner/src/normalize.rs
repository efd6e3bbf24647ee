//! URL canonicalization shared by the crawler's visited set and the classifier.

use url::Url;

/// Canonicalize a URL so that visited-set membership is consistent.
///
/// The fragment is dropped unless it encodes a client-side route (`#/…` or
/// `#!/…`), and trailing slashes are trimmed from every path except the root.
/// Anything that does not parse comes back unchanged.
pub fn normalize(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    if !parsed.fragment().is_some_and(is_route_fragment) {
        parsed.set_fragment(None);
    }

    if !parsed.cannot_be_a_base() {
        let path = parsed.path();
        if path != "/" && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
            parsed.set_path(&trimmed);
        }
    }

    parsed.to_string()
}

/// A fragment that addresses a client-side route rather than an in-page anchor.
pub fn is_route_fragment(fragment: &str) -> bool {
    fragment.starts_with('/') || fragment.starts_with("!/")
}

/// Scheme, host and port all match.
pub fn same_origin(url: &str, base: &Url) -> bool {
    Url::parse(url)
        .map(|u| u.origin() == base.origin())
        .unwrap_or(false)
}

/// Resolve an `href` found on `base` into an absolute URL, skipping links that
/// can never be navigated to.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Extract the path component from a URL, `/` for the root.
pub fn url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() { "/".to_string() } else { path }
        })
        .unwrap_or_else(|| url.to_string())
}
