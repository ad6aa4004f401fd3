use serde::{Deserialize, Serialize};

use crate::codec::encoding::{decode_lenient_text, percent_decode};

/// Node protocol, declared in classification order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ss,
    Vmess,
    Vless,
    Trojan,
    Hysteria2,
    Ssr,
}

impl Protocol {
    /// All protocols in the order prefixes are tested
    pub const ALL: [Protocol; 6] = [
        Protocol::Ss,
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Hysteria2,
        Protocol::Ssr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ss => "ss",
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Ssr => "ssr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ss" | "shadowsocks" => Some(Protocol::Ss),
            "vmess" => Some(Protocol::Vmess),
            "vless" => Some(Protocol::Vless),
            "trojan" => Some(Protocol::Trojan),
            "hysteria2" | "hy2" => Some(Protocol::Hysteria2),
            "ssr" | "shadowsocksr" => Some(Protocol::Ssr),
            _ => None,
        }
    }

    /// URI schemes (with `://`) that identify this protocol
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Protocol::Ss => &["ss://"],
            Protocol::Vmess => &["vmess://"],
            Protocol::Vless => &["vless://"],
            Protocol::Trojan => &["trojan://"],
            Protocol::Hysteria2 => &["hysteria2://", "hy2://"],
            Protocol::Ssr => &["ssr://"],
        }
    }

    /// Classify a share link by its scheme prefix
    pub fn detect(line: &str) -> Option<Self> {
        let head: String = line.chars().take(16).collect::<String>().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.schemes().iter().any(|s| head.starts_with(s)))
    }

    /// Whether the text contains any recognised share-link prefix
    pub fn appears_in(text: &str) -> bool {
        Self::ALL
            .iter()
            .flat_map(|p| p.schemes().iter())
            .any(|scheme| text.contains(scheme))
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geographic label derived from a node's display name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Hk,
    Sg,
    Jp,
    Tw,
    Us,
    Eu,
    Unclassified,
}

impl Region {
    /// Regions with keyword tables, in matching order
    pub const CLASSIFIED: [Region; 6] = [
        Region::Hk,
        Region::Sg,
        Region::Jp,
        Region::Tw,
        Region::Us,
        Region::Eu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Hk => "hk",
            Region::Sg => "sg",
            Region::Jp => "jp",
            Region::Tw => "tw",
            Region::Us => "us",
            Region::Eu => "eu",
            Region::Unclassified => "unclassified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hk" => Some(Region::Hk),
            "sg" => Some(Region::Sg),
            "jp" => Some(Region::Jp),
            "tw" => Some(Region::Tw),
            "us" => Some(Region::Us),
            "eu" => Some(Region::Eu),
            "unclassified" => Some(Region::Unclassified),
            _ => None,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Region::Hk => &["hk", "hongkong", "hong kong", "🇭🇰", "香港"],
            Region::Sg => &["sg", "singapore", "🇸🇬", "新加坡", "狮城"],
            Region::Jp => &["jp", "japan", "tokyo", "osaka", "🇯🇵", "日本", "东京", "大阪"],
            Region::Tw => &["tw", "taiwan", "🇹🇼", "台湾", "臺灣"],
            Region::Us => &["us", "usa", "united states", "america", "🇺🇸", "美国", "美國"],
            Region::Eu => &[
                "eu", "europe", "germany", "france", "netherlands", "🇪🇺", "🇩🇪", "🇫🇷", "🇳🇱",
                "欧", "歐", "德国", "法国", "荷兰",
            ],
            Region::Unclassified => &[],
        }
    }

    /// First region whose keywords appear in the display name
    pub fn classify(display_name: &str) -> Self {
        let lower = display_name.to_lowercase();
        Self::CLASSIFIED
            .into_iter()
            .find(|region| region.keywords().iter().any(|kw| keyword_matches(&lower, kw)))
            .unwrap_or(Region::Unclassified)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Short ASCII codes must not be flanked by letters ("us" is not in "russia")
fn keyword_matches(haystack: &str, keyword: &str) -> bool {
    let is_code = keyword.len() <= 3 && keyword.chars().all(|c| c.is_ascii_alphabetic());
    if !is_code {
        return haystack.contains(keyword);
    }

    haystack.match_indices(keyword).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + keyword.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphabetic())
            && !after.is_some_and(|c| c.is_ascii_alphabetic())
    })
}

/// One proxy node as a share link plus its derived labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub link: String,
    pub protocol: Protocol,
    pub name: String,
    pub region: Region,
}

impl NodeRecord {
    /// Build a record from a share link; `None` for unrecognised schemes
    pub fn parse(line: &str) -> Option<Self> {
        let link = line.trim();
        let protocol = Protocol::detect(link)?;
        let name = display_name(link, protocol);
        let region = Region::classify(&name);

        Some(Self {
            link: link.to_string(),
            protocol,
            name,
            region,
        })
    }
}

/// Human-readable node name: vmess carries it in its JSON payload, others in the fragment
pub fn display_name(link: &str, protocol: Protocol) -> String {
    if protocol == Protocol::Vmess {
        let payload = link.splitn(2, "://").nth(1).unwrap_or_default();
        let payload = payload.split('#').next().unwrap_or_default();
        if let Some(name) = decode_lenient_text(payload)
            .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
            .and_then(|v| v.get("ps").and_then(|ps| ps.as_str()).map(str::to_string))
        {
            return name;
        }
    }

    link.split_once('#')
        .map(|(_, fragment)| percent_decode(fragment))
        .unwrap_or_default()
}
