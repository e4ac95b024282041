//! Best-effort harvesting of free proxy lists.
//!
//! Sources serve plain-text `host:port` lines. Each source is fetched
//! independently and an unreachable or garbage source is tolerated silently;
//! harvested proxies are untrusted by nature and quality is not guaranteed.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::ProxyCandidate;

pub const DEFAULT_SOURCES: &[&str] = &[
    "https://api.proxyscrape.com/v4/free-proxy-list/get?request=displayproxies&protocol=http&proxy_format=ipport&format=text",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
];

/// Cap per source; free lists can be tens of thousands of lines of junk.
const MAX_PER_SOURCE: usize = 200;

/// Shared client for harvest fetches.
#[must_use]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap_or_default()
}

/// Fetch and parse every source, deduplicated by `host:port`.
pub async fn harvest(client: &reqwest::Client, sources: &[String]) -> Vec<ProxyCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for source in sources {
        match fetch_source(client, source).await {
            Ok(body) => {
                let mut accepted = 0usize;
                for line in body.lines() {
                    if accepted >= MAX_PER_SOURCE {
                        break;
                    }
                    if let Some(candidate) = parse_line(line)
                        && seen.insert(candidate.address())
                    {
                        candidates.push(candidate);
                        accepted += 1;
                    }
                }
                debug!(source, accepted, "proxy source harvested");
            }
            Err(e) => {
                // Individual source failure is expected and non-fatal.
                warn!(source, "proxy source unavailable: {e}");
            }
        }
    }

    candidates
}

async fn fetch_source(client: &reqwest::Client, source: &str) -> reqwest::Result<String> {
    client.get(source).send().await?.error_for_status()?.text().await
}

/// Parse one `host:port` line. Anything else (comments, blank lines, HTML
/// error pages) is skipped.
fn parse_line(line: &str) -> Option<ProxyCandidate> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (host, port) = trimmed.split_once(':')?;
    if host.is_empty() || !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return None;
    }
    let port: u16 = port.trim().parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(ProxyCandidate::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        let candidate = parse_line("203.0.113.7:8080").expect("should parse");
        assert_eq!(candidate.host, "203.0.113.7");
        assert_eq!(candidate.port, 8080);
        assert!(candidate.is_healthy());
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("# comment").is_none());
        assert!(parse_line("<html><body>404</body></html>").is_none());
        assert!(parse_line("10.0.0.1:notaport").is_none());
        assert!(parse_line("10.0.0.1:0").is_none());
        assert!(parse_line("nocolon").is_none());
    }
}
