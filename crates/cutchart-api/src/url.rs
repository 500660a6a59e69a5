//! Request URL assembly
//!
//! Paths live under `/cutchart/`. Empty segments are dropped, the rest are
//! percent-encoded and joined with `/`, and query pairs keep the order
//! they were given in.

use reqwest::Url;

use crate::error::{Error, Result};

/// Root path of every API route
pub const API_ROOT: &str = "/cutchart/";

pub fn build_url(base: &Url, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base.clone();
    url.set_path(API_ROOT);
    url.set_fragment(None);

    let segments: Vec<&str> = segments.iter().copied().filter(|s| !s.is_empty()).collect();
    if !segments.is_empty() {
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(format!("{base} cannot carry a path")))?
            .pop_if_empty()
            .extend(segments);
    }

    url.set_query(None);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().copied());
    }
    Ok(url)
}

/// The origin-relative part of `url`, e.g. `/cutchart/x?units=english`.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.hypertherm.com").unwrap()
    }

    #[test]
    fn joins_segments_and_keeps_query_order() {
        let url = build_url(
            &base(),
            &["base", "route"],
            &[("units", "english"), ("param2", "valid")],
        )
        .unwrap();
        assert_eq!(
            path_and_query(&url),
            "/cutchart/base/route?units=english&param2=valid"
        );
        assert_eq!(url.host_str(), Some("api.hypertherm.com"));
    }

    #[test]
    fn drops_empty_segments() {
        let url = build_url(&base(), &["", "powermax105", ""], &[]).unwrap();
        assert_eq!(path_and_query(&url), "/cutchart/powermax105");
    }

    #[test]
    fn root_keeps_trailing_slash() {
        assert_eq!(path_and_query(&build_url(&base(), &[], &[]).unwrap()), "/cutchart/");

        let all_products = build_url(&base(), &[""], &[("units", "metric")]).unwrap();
        assert_eq!(path_and_query(&all_products), "/cutchart/?units=metric");
    }

    #[test]
    fn encodes_segments_and_values() {
        let url = build_url(&base(), &["a b", "c/d"], &[("q", "x&y")]).unwrap();
        assert_eq!(path_and_query(&url), "/cutchart/a%20b/c%2Fd?q=x%26y");
    }

    #[test]
    fn replaces_base_path_and_query() {
        let base = Url::parse("http://127.0.0.1:8080/ignored?stale=1#frag").unwrap();
        let url = build_url(&base, &["p"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/cutchart/p");
    }
}
