//! Structured (clash YAML) subscription documents
//!
//! Parsing walks the `proxies` collection entry by entry so one odd entry
//! never discards the rest of the document. Rendering produces a complete
//! rule-mode configuration with the usual selection groups.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use super::links;
use crate::error::Result;
use crate::models::Protocol;

/// Top-level keys that mark a clash configuration
const STRUCTURED_KEYS: &[&str] = &[
    "proxies",
    "proxy-groups",
    "proxy-providers",
    "rules",
    "port",
    "socks-port",
    "mixed-port",
    "allow-lan",
    "mode",
    "log-level",
    "external-controller",
    "dns",
];

/// Health-check target for the url-test group
pub const URL_TEST_TARGET: &str = "http://www.gstatic.com/generate_204";

/// One proxy entry in clash form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClashProxy {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub server: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ClashProxy {
    pub fn new(name: impl Into<String>, kind: &str, server: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            kind: kind.to_string(),
            server: server.into(),
            port,
            extra: BTreeMap::new(),
        }
    }

    /// Builder-style setter for protocol-specific fields
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn int_field(&self, key: &str) -> Option<i64> {
        match self.extra.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn bool_field(&self, key: &str) -> bool {
        match self.extra.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }

    /// Look up a key inside a nested mapping such as `ws-opts`
    pub fn nested_str(&self, section: &str, key: &str) -> Option<&str> {
        self.extra
            .get(section)?
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(n) => u16::try_from(n).map_err(serde::de::Error::custom),
        PortRepr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Entries in `proxies` are either share-link strings or objects
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProxyEntry {
    Link(String),
    Proxy(ClashProxy),
}

#[derive(Debug, Deserialize)]
struct ClashDocument {
    #[serde(default)]
    proxies: Option<Vec<Value>>,
}

/// Result of walking a structured document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredDecode {
    /// Share links for every entry that could be expressed as one
    pub links: Vec<String>,
    /// Entry counts by declared type
    pub type_counts: BTreeMap<String, usize>,
    /// Entries found under `proxies`
    pub entries: usize,
}

/// At least two recognised top-level keys
pub fn looks_structured(text: &str) -> bool {
    let mut found = HashSet::new();
    for line in text.lines() {
        if line.starts_with([' ', '\t', '-', '#']) {
            continue;
        }
        if let Some((key, _)) = line.split_once(':') {
            let key = key.trim().trim_matches('"');
            if STRUCTURED_KEYS.contains(&key) {
                found.insert(key);
            }
        }
    }
    found.len() >= 2
}

/// Walk `proxies`, typing each entry and converting it to a share link
pub fn parse_structured(text: &str) -> Result<StructuredDecode> {
    let document: ClashDocument = serde_yaml::from_str(text)?;
    let entries = document.proxies.unwrap_or_default();

    let mut decode = StructuredDecode {
        entries: entries.len(),
        ..Default::default()
    };

    for value in entries {
        let declared_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_lowercase);

        match serde_yaml::from_value::<ProxyEntry>(value) {
            Ok(ProxyEntry::Link(link)) => {
                let kind = Protocol::detect(&link).map(|p| p.as_str()).unwrap_or("unknown");
                *decode.type_counts.entry(kind.to_string()).or_default() += 1;
                if kind != "unknown" {
                    decode.links.push(link.trim().to_string());
                }
            }
            Ok(ProxyEntry::Proxy(proxy)) => {
                *decode
                    .type_counts
                    .entry(proxy.kind.to_lowercase())
                    .or_default() += 1;
                if let Some(link) = links::proxy_to_link(&proxy) {
                    decode.links.push(link);
                }
            }
            Err(_) => {
                let kind = declared_type.unwrap_or_else(|| "unknown".to_string());
                *decode.type_counts.entry(kind).or_default() += 1;
            }
        }
    }

    Ok(decode)
}

#[derive(Debug, Serialize)]
struct ProxyGroup {
    name: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    proxies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
}

impl ProxyGroup {
    fn select(name: &'static str, proxies: &[&str]) -> Self {
        Self {
            name,
            kind: "select",
            proxies: proxies.iter().map(|s| s.to_string()).collect(),
            url: None,
            interval: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ClashConfig<'a> {
    #[serde(rename = "mixed-port")]
    mixed_port: u16,
    #[serde(rename = "allow-lan")]
    allow_lan: bool,
    mode: &'static str,
    #[serde(rename = "log-level")]
    log_level: &'static str,
    proxies: &'a [ClashProxy],
    #[serde(rename = "proxy-groups")]
    proxy_groups: Vec<ProxyGroup>,
    rules: &'static [&'static str],
}

const RULES: &[&str] = &[
    "DOMAIN-SUFFIX,local,DIRECT",
    "IP-CIDR,127.0.0.0/8,DIRECT",
    "IP-CIDR,172.16.0.0/12,DIRECT",
    "IP-CIDR,192.168.0.0/16,DIRECT",
    "IP-CIDR,10.0.0.0/8,DIRECT",
    "IP-CIDR,100.64.0.0/10,DIRECT",
    "DOMAIN-SUFFIX,t.me,Telegram",
    "DOMAIN-SUFFIX,telegram.org,Telegram",
    "DOMAIN-SUFFIX,youtube.com,Media",
    "DOMAIN-SUFFIX,netflix.com,Media",
    "DOMAIN-SUFFIX,microsoft.com,Microsoft",
    "DOMAIN-SUFFIX,apple.com,Apple",
    "DOMAIN-SUFFIX,cn,DIRECT",
    "GEOIP,CN,DIRECT",
    "MATCH,Final",
];

/// Render a rule-mode configuration; proxy names must already be unique
pub fn render_config(proxies: &[ClashProxy]) -> Result<String> {
    let names: Vec<String> = proxies.iter().map(|p| p.name.clone()).collect();

    let mut node_select = names.clone();
    node_select.extend(["Auto".to_string(), "DIRECT".to_string()]);

    let auto = ProxyGroup {
        name: "Auto",
        kind: "url-test",
        proxies: if names.is_empty() {
            vec!["DIRECT".to_string()]
        } else {
            names
        },
        url: Some(URL_TEST_TARGET),
        interval: Some(300),
    };

    let config = ClashConfig {
        mixed_port: 7890,
        allow_lan: false,
        mode: "rule",
        log_level: "info",
        proxies,
        proxy_groups: vec![
            ProxyGroup {
                name: "Node-Select",
                kind: "select",
                proxies: node_select,
                url: None,
                interval: None,
            },
            auto,
            ProxyGroup::select("Media", &["Node-Select", "Auto", "DIRECT"]),
            ProxyGroup::select("Telegram", &["Node-Select", "DIRECT"]),
            ProxyGroup::select("Microsoft", &["DIRECT", "Node-Select"]),
            ProxyGroup::select("Apple", &["DIRECT", "Node-Select"]),
            ProxyGroup::select("Final", &["Node-Select", "Auto", "DIRECT"]),
        ],
        rules: RULES,
    };

    Ok(serde_yaml::to_string(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
mixed-port: 7890
mode: rule
proxies:
  - name: "HK 01"
    type: trojan
    server: hk.example.net
    port: 443
    password: secret
    sni: hk.example.net
  - name: "SG ss"
    type: ss
    server: sg.example.net
    port: "8388"
    cipher: aes-256-gcm
    password: pw
  - name: "local socks"
    type: socks5
    server: 10.0.0.1
    port: 1080
  - "vless://uuid-1@jp.example.net:443?security=tls#JP"
  - name: broken
    type: vmess
rules:
  - MATCH,DIRECT
"#;

    #[test]
    fn test_looks_structured() {
        assert!(looks_structured(DOC));
        assert!(!looks_structured("proxies:\n  - a\n"));
        assert!(!looks_structured("trojan://pw@h:443#proxies: mode:"));
    }

    #[test]
    fn test_parse_structured_types_and_links() {
        let decode = parse_structured(DOC).unwrap();

        assert_eq!(decode.entries, 5);
        assert_eq!(decode.type_counts.get("trojan"), Some(&1));
        assert_eq!(decode.type_counts.get("ss"), Some(&1));
        assert_eq!(decode.type_counts.get("socks5"), Some(&1));
        assert_eq!(decode.type_counts.get("vless"), Some(&1));
        assert_eq!(decode.type_counts.get("vmess"), Some(&1));

        // socks5 has no share-link form; the broken vmess entry lacks a server
        assert_eq!(decode.links.len(), 3);
        assert!(decode.links[0].starts_with("trojan://secret@hk.example.net:443"));
        assert!(decode.links[1].starts_with("ss://"));
        assert_eq!(decode.links[2], "vless://uuid-1@jp.example.net:443?security=tls#JP");
    }

    #[test]
    fn test_parse_structured_empty_proxies() {
        let decode = parse_structured("mode: rule\nproxies:\n").unwrap();
        assert_eq!(decode.entries, 0);
        assert!(decode.links.is_empty());
    }

    #[test]
    fn test_render_config_groups() {
        let proxies = vec![
            ClashProxy::new("A", "trojan", "a.example.net", 443).with("password", "x"),
            ClashProxy::new("B", "ss", "b.example.net", 8388)
                .with("cipher", "aes-128-gcm")
                .with("password", "y"),
        ];

        let yaml = render_config(&proxies).unwrap();
        let value: Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(value["mixed-port"].as_u64(), Some(7890));
        assert_eq!(value["mode"].as_str(), Some("rule"));
        assert_eq!(value["proxies"].as_sequence().unwrap().len(), 2);
        assert_eq!(value["proxies"][0]["password"].as_str(), Some("x"));

        let groups = value["proxy-groups"].as_sequence().unwrap();
        assert_eq!(groups[0]["name"].as_str(), Some("Node-Select"));
        assert_eq!(groups[0]["proxies"].as_sequence().unwrap().len(), 4);
        assert_eq!(groups[1]["type"].as_str(), Some("url-test"));
        assert_eq!(groups[1]["url"].as_str(), Some(URL_TEST_TARGET));
        assert_eq!(groups[1]["interval"].as_u64(), Some(300));

        let rules = value["rules"].as_sequence().unwrap();
        assert_eq!(rules.last().unwrap().as_str(), Some("MATCH,Final"));
        assert!(rules.iter().any(|r| r.as_str() == Some("GEOIP,CN,DIRECT")));
    }

    #[test]
    fn test_render_config_without_proxies_is_still_valid() {
        let yaml = render_config(&[]).unwrap();
        let value: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["proxy-groups"][1]["proxies"][0].as_str(), Some("DIRECT"));
    }
}
