//! Proxy source scraping
//!
//! Fetches line-based `ip:port` lists from public sources, parses defensively
//! (no source is trusted to be well-formed), and deduplicates with
//! first-source-wins semantics.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{HazeError, Result};
use crate::models::ProxyRecord;

/// The public lists scraped on every refresh
pub const PROXY_SOURCES: [&str; 5] = [
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
];

const WEBSHARE_URL: &str =
    "https://proxy.webshare.io/api/v2/proxy/list/?mode=direct&page=1&page_size=25";

/// Source identifier: the host segment of the source URL
pub fn source_name(url: &str) -> String {
    url.split('/').nth(2).unwrap_or(url).to_string()
}

/// Parse one `ip:port` line. Anything else is skipped.
pub fn parse_proxy_line(line: &str, source: &str) -> Option<ProxyRecord> {
    let line = line.trim();
    let (ip_str, port_str) = line.split_once(':')?;

    let ip: Ipv4Addr = ip_str.parse().ok()?;
    let port: u16 = port_str.parse().ok()?;
    if port == 0 {
        return None;
    }

    Some(ProxyRecord::new(ip.to_string(), port, source))
}

/// Parse a whole source body, skipping malformed lines
pub fn parse_source_body(body: &str, source: &str) -> Vec<ProxyRecord> {
    body.lines()
        .filter_map(|line| parse_proxy_line(line, source))
        .collect()
}

/// Fetch and parse one source URL
pub async fn fetch_source(client: &reqwest::Client, url: &str) -> Result<Vec<ProxyRecord>> {
    let source = source_name(url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| HazeError::SourceFetch(format!("{}: {}", source, e)))?
        .error_for_status()
        .map_err(|e| HazeError::SourceFetch(format!("{}: {}", source, e)))?;

    let body = response
        .text()
        .await
        .map_err(|e| HazeError::SourceFetch(format!("{}: {}", source, e)))?;

    let proxies = parse_source_body(&body, &source);
    info!(source = %source, count = proxies.len(), "Source fetched");
    Ok(proxies)
}

/// Fetch every configured source concurrently. A failing source is logged
/// and contributes nothing; the union of the rest is returned in source
/// order, which is what makes first-source-wins deterministic.
pub async fn fetch_all_sources(client: &reqwest::Client) -> Vec<Vec<ProxyRecord>> {
    let fetches = PROXY_SOURCES.iter().map(|url| fetch_source(client, url));
    let results = futures::future::join_all(fetches).await;

    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(proxies) => Some(proxies),
            Err(e) => {
                warn!("Skipping source: {}", e);
                None
            }
        })
        .collect()
}

/// Merge batches keeping the first record seen for each `ip:port`
pub fn dedup_first_wins(batches: Vec<Vec<ProxyRecord>>) -> Vec<ProxyRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();

    for batch in batches {
        for record in batch {
            if seen.insert(record.key()) {
                unique.push(record);
            }
        }
    }

    unique
}

#[derive(Debug, Deserialize)]
struct WebshareResponse {
    #[serde(default)]
    results: Vec<WebshareProxy>,
}

#[derive(Debug, Deserialize)]
struct WebshareProxy {
    proxy_address: String,
    port: u16,
    #[serde(default)]
    country_code: Option<String>,
}

/// Fetch the Webshare fallback list (direct mode)
pub async fn fetch_webshare(client: &reqwest::Client, api_key: &str) -> Result<Vec<ProxyRecord>> {
    let response = client
        .get(WEBSHARE_URL)
        .header("Authorization", format!("Token {}", api_key))
        .send()
        .await
        .map_err(|e| HazeError::SourceFetch(format!("webshare: {}", e)))?
        .error_for_status()
        .map_err(|e| HazeError::SourceFetch(format!("webshare: {}", e)))?;

    let parsed: WebshareResponse = response
        .json()
        .await
        .map_err(|e| HazeError::SourceFetch(format!("webshare: {}", e)))?;

    let proxies: Vec<ProxyRecord> = parsed
        .results
        .into_iter()
        .map(|item| {
            let mut record = ProxyRecord::new(item.proxy_address, item.port, "webshare");
            record.country = item.country_code.filter(|c| !c.is_empty());
            record
        })
        .collect();

    info!(count = proxies.len(), "Webshare fetched");
    Ok(proxies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_line_valid() {
        let p = parse_proxy_line("1.2.3.4:8080", "src").unwrap();
        assert_eq!(p.ip, "1.2.3.4");
        assert_eq!(p.port, 8080);
        assert_eq!(p.source, "src");
        assert_eq!(p.protocol, "http");

        // Whitespace is tolerated
        let p = parse_proxy_line("  10.0.0.1:80  ", "src").unwrap();
        assert_eq!(p.key(), "10.0.0.1:80");
    }

    #[test]
    fn test_parse_proxy_line_rejects_garbage() {
        assert!(parse_proxy_line("", "src").is_none());
        assert!(parse_proxy_line("# comment", "src").is_none());
        assert!(parse_proxy_line("no colon here", "src").is_none());
        assert!(parse_proxy_line("1.2.3.4", "src").is_none());
        assert!(parse_proxy_line("1.2.3.4:notaport", "src").is_none());
        assert!(parse_proxy_line("1.2.3.4:0", "src").is_none());
        assert!(parse_proxy_line("1.2.3.4:99999", "src").is_none());
        assert!(parse_proxy_line("999.2.3.4:8080", "src").is_none());
        assert!(parse_proxy_line("example.com:8080", "src").is_none());
        assert!(parse_proxy_line("http://1.2.3.4:8080", "src").is_none());
    }

    #[test]
    fn test_parse_source_body_skips_bad_lines() {
        let body = "1.2.3.4:8080\n\ngarbage\n5.6.7.8:3128\n300.1.1.1:80\n";
        let proxies = parse_source_body(body, "src");
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].key(), "1.2.3.4:8080");
        assert_eq!(proxies[1].key(), "5.6.7.8:3128");
    }

    #[test]
    fn test_source_name_is_the_host() {
        assert_eq!(
            source_name("https://api.proxyscrape.com/v2/?request=getproxies"),
            "api.proxyscrape.com"
        );
        assert_eq!(
            source_name("https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt"),
            "raw.githubusercontent.com"
        );
    }

    #[test]
    fn test_dedup_first_source_wins() {
        let batch_a = parse_source_body("1.2.3.4:8080\n5.6.7.8:80", "source-a");
        let batch_b = parse_source_body("1.2.3.4:8080\n9.9.9.9:3128", "source-b");

        let unique = dedup_first_wins(vec![batch_a, batch_b]);

        assert_eq!(unique.len(), 3);
        let dup = unique.iter().find(|p| p.key() == "1.2.3.4:8080").unwrap();
        assert_eq!(dup.source, "source-a");
    }

    #[test]
    fn test_dedup_within_a_single_source() {
        let batch = parse_source_body("1.2.3.4:8080\n1.2.3.4:8080\n1.2.3.4:8081", "src");
        let unique = dedup_first_wins(vec![batch]);
        assert_eq!(unique.len(), 2);
    }
}
