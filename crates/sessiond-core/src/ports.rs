//! Heuristic port discovery from command lines and captured output.
//!
//! Purely advisory: the patterns catch the common ways dev servers announce
//! their port. A miss is fine, a wrong guess is fine, an error never is.

use std::sync::OnceLock;

use regex::Regex;

fn port_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)https?://[^\s:/]+:(\d{2,5})",
            r"(?i)(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})",
            r"(?i)\bport[\s:=]+(\d{2,5})\b",
            r"--port[=\s]+(\d{2,5})\b",
            r"(?:^|\s)-p(?:=|\s+)?(\d{2,5})\b",
            r"\bPORT=(\d{2,5})\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Scan free-form text (typically captured output) for listening ports.
/// First match wins the ordering; duplicates are dropped.
pub fn extract_ports_from_text(text: &str) -> Vec<u16> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut ports = Vec::new();
    for pattern in port_patterns() {
        for captures in pattern.captures_iter(text) {
            let Some(group) = captures.get(1) else {
                continue;
            };
            let Ok(port) = group.as_str().parse::<u32>() else {
                continue;
            };
            if (1..=65_535).contains(&port) {
                let port = port as u16;
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

/// Ports declared in the launch command itself, e.g. `--port 3000`.
pub fn extract_ports_from_command(command: &str) -> Vec<u16> {
    extract_ports_from_text(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_ports() {
        assert_eq!(
            extract_ports_from_text("Server ready at http://localhost:3000"),
            vec![3000]
        );
        assert_eq!(
            extract_ports_from_text("listening on https://example.dev:8443/path"),
            vec![8443]
        );
    }

    #[test]
    fn test_host_colon_ports() {
        assert_eq!(
            extract_ports_from_text("bound to 0.0.0.0:8080"),
            vec![8080]
        );
        assert_eq!(extract_ports_from_text("on [::1]:9229 now"), vec![9229]);
    }

    #[test]
    fn test_flag_and_env_ports() {
        assert_eq!(extract_ports_from_command("serve --port 4000"), vec![4000]);
        assert_eq!(extract_ports_from_command("serve --port=5000"), vec![5000]);
        assert_eq!(extract_ports_from_command("http-server -p 8081"), vec![8081]);
        assert_eq!(extract_ports_from_command("http-server -p=8081"), vec![8081]);
        assert_eq!(extract_ports_from_command("http-server -p8081"), vec![8081]);
        assert_eq!(
            extract_ports_from_command("PORT=3001 node server.js"),
            vec![3001]
        );
    }

    #[test]
    fn test_prose_port_mention() {
        assert_eq!(
            extract_ports_from_text("Dev server listening on port 5173"),
            vec![5173]
        );
    }

    #[test]
    fn test_dedupes_and_orders() {
        let text = "http://localhost:3000\nready on localhost:3000\nport 9000";
        assert_eq!(extract_ports_from_text(text), vec![3000, 9000]);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(extract_ports_from_text("localhost:99999").is_empty());
        assert!(extract_ports_from_text("nothing here").is_empty());
        assert!(extract_ports_from_text("").is_empty());
    }

    #[test]
    fn test_single_digit_not_matched() {
        // Ports below 10 are noise more often than real listeners.
        assert!(extract_ports_from_text("-p 5").is_empty());
    }
}
