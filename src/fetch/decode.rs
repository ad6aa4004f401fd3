//! Layered payload decoding
//!
//! Layers are tried in order: share links in the clear, a base64 body, then a
//! structured document. The first layer that recognises the payload wins.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::encoding::{decode_lenient_text, looks_like_base64};
use crate::codec::{looks_structured, parse_structured};
use crate::models::{DecodePath, Protocol};

/// Share links recovered from one payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    pub links: Vec<String>,
    pub path: DecodePath,
    pub type_counts: BTreeMap<String, usize>,
    /// Text the links came from, used for traffic extraction
    pub text: String,
}

impl DecodeOutcome {
    fn unrecognized(text: &str) -> Self {
        Self {
            links: Vec::new(),
            path: DecodePath::Unrecognized,
            type_counts: BTreeMap::new(),
            text: text.to_string(),
        }
    }

    fn from_lines(text: String, path: DecodePath) -> Self {
        let links = split_links(&text);
        let mut type_counts = BTreeMap::new();
        for link in &links {
            if let Some(protocol) = Protocol::detect(link) {
                *type_counts.entry(protocol.as_str().to_string()).or_default() += 1;
            }
        }
        Self {
            links,
            path,
            type_counts,
            text,
        }
    }

    fn from_structured(text: String, path: DecodePath) -> Self {
        match parse_structured(&text) {
            Ok(decode) => Self {
                links: decode.links,
                path,
                type_counts: decode.type_counts,
                text,
            },
            Err(e) => {
                debug!("Structured payload failed to parse: {}", e);
                Self::unrecognized(&text)
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.links.len()
    }
}

/// Run the decode layers over a response body
pub fn decode_payload(body: &str) -> DecodeOutcome {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return DecodeOutcome::unrecognized(body);
    }

    let structured = looks_structured(trimmed);

    if !structured && Protocol::appears_in(trimmed) {
        return DecodeOutcome::from_lines(trimmed.to_string(), DecodePath::FastPath);
    }

    if !structured && looks_like_base64(trimmed) {
        if let Some(decoded) = decode_lenient_text(trimmed) {
            if looks_structured(&decoded) {
                return DecodeOutcome::from_structured(decoded, DecodePath::Structured);
            }
            if Protocol::appears_in(&decoded) {
                return DecodeOutcome::from_lines(decoded, DecodePath::Base64);
            }
        }
    }

    if structured {
        return DecodeOutcome::from_structured(trimmed.to_string(), DecodePath::Structured);
    }

    DecodeOutcome::unrecognized(trimmed)
}

/// Lines that are share links, with list markers and quotes removed
pub fn split_links(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("- ")
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
        })
        .filter(|line| Protocol::detect(line).is_some())
        .map(str::to_string)
        .collect()
}

/// Node counts disagree by more than `tolerance` of the larger count
pub fn diverges(primary: usize, alternate: usize, tolerance: f64) -> bool {
    if primary == alternate {
        return false;
    }
    let larger = primary.max(alternate) as f64;
    primary.abs_diff(alternate) as f64 / larger > tolerance
}

/// Text outside share-link lines, where panels print status messages
pub fn non_link_text(text: &str) -> String {
    text.lines()
        .filter(|line| Protocol::detect(line.trim()).is_none())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoding::encode_standard;

    #[test]
    fn test_fast_path_plain_links() {
        let body = "ss://AAA#HK\nvmess://BBB#US\n\nnot a link\n";
        let outcome = decode_payload(body);

        assert_eq!(outcome.path, DecodePath::FastPath);
        assert_eq!(outcome.links, vec!["ss://AAA#HK", "vmess://BBB#US"]);
        assert_eq!(outcome.type_counts.get("ss"), Some(&1));
        assert_eq!(outcome.type_counts.get("vmess"), Some(&1));
    }

    #[test]
    fn test_base64_body() {
        let body = encode_standard(b"trojan://CCC@h.example.net:443#free-node\n");
        let outcome = decode_payload(&body);

        assert_eq!(outcome.path, DecodePath::Base64);
        assert_eq!(outcome.links, vec!["trojan://CCC@h.example.net:443#free-node"]);
    }

    #[test]
    fn test_base64_wrapped_structured_document() {
        let yaml = "mode: rule\nproxies:\n  - vless://id@jp.example.net:443#JP\n";
        let outcome = decode_payload(&encode_standard(yaml.as_bytes()));

        assert_eq!(outcome.path, DecodePath::Structured);
        assert_eq!(outcome.links, vec!["vless://id@jp.example.net:443#JP"]);
    }

    #[test]
    fn test_structured_document_with_objects() {
        let yaml = r#"
port: 7890
proxies:
  - {name: "SG", type: trojan, server: sg.example.net, port: 443, password: pw}
proxy-groups: []
"#;
        let outcome = decode_payload(yaml);
        assert_eq!(outcome.path, DecodePath::Structured);
        assert_eq!(outcome.links.len(), 1);
        assert!(outcome.links[0].starts_with("trojan://pw@sg.example.net:443"));
    }

    #[test]
    fn test_unrecognized_payloads() {
        assert_eq!(decode_payload("").path, DecodePath::Unrecognized);
        assert_eq!(decode_payload("<html>blocked</html>").path, DecodePath::Unrecognized);
        let outcome = decode_payload("mode: rule\nproxies: [\n");
        assert_eq!(outcome.path, DecodePath::Unrecognized);
        assert!(outcome.links.is_empty());
    }

    #[test]
    fn test_split_links_strips_list_markers() {
        let links = split_links("  - \"ss://A#x\"\n- 'hysteria2://B@h:1#y'\nfoo");
        assert_eq!(links, vec!["ss://A#x", "hysteria2://B@h:1#y"]);
    }

    #[test]
    fn test_diverges() {
        assert!(!diverges(10, 10, 0.2));
        assert!(!diverges(10, 9, 0.2));
        assert!(diverges(10, 7, 0.2));
        assert!(diverges(0, 3, 0.2));
        assert!(!diverges(0, 0, 0.2));
    }

    #[test]
    fn test_non_link_text() {
        let text = "vmess://abc#流量已用尽\n请求过多，请稍后再试";
        assert_eq!(non_link_text(text), "请求过多，请稍后再试");
    }
}
