//! Anti-bot block detection
//!
//! A response is judged blocked by its status code, by tell-tale phrases in
//! the body, or by a redirect into a challenge page. Only plain-HTTP
//! responses can be inspected; CONNECT tunnels are opaque past establishment.

/// Status codes that indicate the upstream was rejected outright
const BLOCK_STATUS_CODES: [u16; 4] = [403, 407, 429, 503];

/// Case-insensitive phrases scanned for in the response body
const BODY_PATTERNS: [&str; 8] = [
    "cloudflare",
    "captcha",
    "access denied",
    "blocked",
    "unusual traffic",
    "rate limit",
    "banned",
    "forbidden",
];

/// Path fragments that mark a redirect target as a challenge page
const CHALLENGE_PATTERNS: [&str; 4] = ["/cdn-cgi/challenge", "/challenge", "captcha", "recaptcha"];

/// Only this much of the body is scanned
pub const BODY_SCAN_LIMIT: usize = 64 * 1024;

/// Judge a response. Returns the reason when it looks like a block.
pub fn detect_block(status: u16, body: &[u8], location: Option<&str>) -> Option<String> {
    if BLOCK_STATUS_CODES.contains(&status) {
        return Some(format!("block status {}", status));
    }

    let scan = &body[..body.len().min(BODY_SCAN_LIMIT)];
    let text = String::from_utf8_lossy(scan).to_lowercase();
    for pattern in BODY_PATTERNS {
        if text.contains(pattern) {
            return Some(format!("body pattern '{}'", pattern));
        }
    }

    if (300..400).contains(&status) {
        if let Some(location) = location {
            let location = location.to_lowercase();
            for pattern in CHALLENGE_PATTERNS {
                if location.contains(pattern) {
                    return Some(format!("challenge redirect '{}'", pattern));
                }
            }
        }
    }

    None
}

/// Convenience predicate over `detect_block`
pub fn is_blocked(status: u16, body: &[u8], location: Option<&str>) -> bool {
    detect_block(status, body, location).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_status_codes() {
        for status in [403, 407, 429, 503] {
            assert!(is_blocked(status, b"", None), "status {} should block", status);
        }
        for status in [200, 201, 301, 404, 500, 502] {
            assert!(!is_blocked(status, b"", None), "status {} should pass", status);
        }
    }

    #[test]
    fn test_body_patterns_case_insensitive() {
        assert!(is_blocked(200, b"Checking your browser - Cloudflare", None));
        assert!(is_blocked(200, b"please solve this CAPTCHA", None));
        assert!(is_blocked(200, b"Access Denied", None));
        assert!(is_blocked(200, b"you have been BANNED", None));
        assert!(is_blocked(200, b"unusual traffic from your network", None));
        assert!(is_blocked(200, b"rate limit exceeded", None));

        assert!(!is_blocked(200, b"<html><body>hello world</body></html>", None));
    }

    #[test]
    fn test_body_scan_is_bounded() {
        // The pattern sits past the scan limit, so it is not seen
        let mut body = vec![b'a'; BODY_SCAN_LIMIT];
        body.extend_from_slice(b"captcha");
        assert!(!is_blocked(200, &body, None));

        // Inside the window it is
        let mut body = vec![b'a'; BODY_SCAN_LIMIT - 7];
        body.extend_from_slice(b"captcha");
        assert!(is_blocked(200, &body, None));
    }

    #[test]
    fn test_challenge_redirects() {
        assert!(is_blocked(302, b"", Some("https://example.com/cdn-cgi/challenge-platform")));
        assert!(is_blocked(301, b"", Some("https://example.com/challenge?next=/")));
        assert!(is_blocked(307, b"", Some("https://example.com/RECAPTCHA/verify")));

        assert!(!is_blocked(302, b"", Some("https://example.com/login")));
        // Location is only consulted on 3xx
        assert!(!is_blocked(200, b"", Some("https://example.com/challenge")));
    }

    #[test]
    fn test_detect_block_reports_reason() {
        assert_eq!(
            detect_block(403, b"", None).unwrap(),
            "block status 403".to_string()
        );
        assert!(detect_block(200, b"solve the captcha", None)
            .unwrap()
            .contains("captcha"));
        assert!(detect_block(302, b"", Some("/challenge"))
            .unwrap()
            .contains("challenge"));
        assert_eq!(detect_block(200, b"ok", None), None);
    }

    #[test]
    fn test_non_utf8_body_does_not_panic() {
        let body = vec![0xff, 0xfe, 0x00, 0x80, 0x81];
        assert!(!is_blocked(200, &body, None));
    }
}
