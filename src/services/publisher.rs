//! Artifact publishing
//!
//! Writes the snapshot of one run under the output directory. Every file is
//! written to a temp path and renamed into place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::codec::encoding::encode_standard;
use crate::codec::{link_to_proxy, render_config, ClashProxy};
use crate::error::Result;
use crate::models::{AggregationSnapshot, NodeRecord, Protocol, Region};

/// Writes published artifacts into one output directory
#[derive(Debug, Clone)]
pub struct Publisher {
    root: PathBuf,
}

impl Publisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every artifact; returns the number of files written
    #[instrument(skip(self, snapshot), fields(nodes = snapshot.nodes.len()))]
    pub async fn publish(&self, snapshot: &AggregationSnapshot) -> Result<usize> {
        let mut written = 0;

        self.write_links("sub/all.txt", &snapshot.nodes).await?;
        written += 1;

        for protocol in Protocol::ALL {
            let path = format!("sub/proto/{}.txt", protocol.as_str());
            self.write_links(&path, snapshot.nodes_for(protocol)).await?;
            written += 1;
        }

        let ss_body = join_links(snapshot.nodes_for(Protocol::Ss));
        let ss_base64 = if ss_body.is_empty() {
            String::new()
        } else {
            encode_standard(ss_body.as_bytes())
        };
        self.write_text("sub/proto/ss-base64.txt", &ss_base64).await?;
        written += 1;

        for region in Region::CLASSIFIED {
            let path = format!("sub/regions/{}.txt", region.as_str());
            self.write_links(&path, snapshot.nodes_in(region)).await?;
            written += 1;
        }

        self.write_links("sub/good.txt", &snapshot.good).await?;
        self.write_links("sub/top.txt", &snapshot.top).await?;
        self.write_yaml("sub/good.yaml", &snapshot.good).await?;
        self.write_yaml("sub/top.yaml", &snapshot.top).await?;
        written += 4;

        let urls: Vec<&str> = snapshot.alive_sources.iter().map(String::as_str).collect();
        self.write_text("sub/urls.txt", &join_lines(&urls)).await?;
        self.write_json("sub/url_meta.json", &snapshot.sources).await?;
        self.write_json("health.json", &snapshot.summary).await?;
        written += 3;

        info!(
            files = written,
            nodes = snapshot.nodes.len(),
            good = snapshot.good.len(),
            top = snapshot.top.len(),
            "Published artifacts to {}",
            self.root.display()
        );
        Ok(written)
    }

    async fn write_links(&self, relative: &str, nodes: &[NodeRecord]) -> Result<()> {
        self.write_text(relative, &join_links(nodes)).await
    }

    async fn write_yaml(&self, relative: &str, nodes: &[NodeRecord]) -> Result<()> {
        let proxies = to_proxies(nodes);
        debug!(
            file = relative,
            converted = proxies.len(),
            skipped = nodes.len() - proxies.len(),
            "Rendering clash config"
        );
        self.write_text(relative, &render_config(&proxies)?).await
    }

    async fn write_json<T: Serialize + ?Sized>(&self, relative: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string_pretty(value)?;
        self.write_text(relative, &body).await
    }

    async fn write_text(&self, relative: &str, body: &str) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Newline-joined lines with a trailing newline; empty input gives ""
fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn join_links(nodes: &[NodeRecord]) -> String {
    let links: Vec<&str> = nodes.iter().map(|n| n.link.as_str()).collect();
    join_lines(&links)
}

/// Convert nodes to clash entries with unique names
///
/// Links that cannot be converted are left out. Unnamed entries are called
/// `<protocol>-<index>`; a repeated name gets a ` 2`, ` 3`, ... suffix.
pub fn to_proxies(nodes: &[NodeRecord]) -> Vec<ClashProxy> {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut proxies = Vec::with_capacity(nodes.len());

    for (index, node) in nodes.iter().enumerate() {
        let Some(mut proxy) = link_to_proxy(&node.link) else {
            continue;
        };

        let base = match proxy.name.trim() {
            "" => format!("{}-{}", node.protocol.as_str(), index + 1),
            name => name.to_string(),
        };
        let mut name = base.clone();
        while let Some(count) = used.get_mut(&name) {
            *count += 1;
            name = format!("{} {}", base, count);
        }
        used.insert(name.clone(), 1);

        proxy.name = name;
        proxies.push(proxy);
    }

    proxies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::config::AggregateConfig;
    use crate::models::{DecodePath, DecodedSource, SourceOutcome, SourceReport, TrafficInfo};
    use crate::source::normalize;
    use chrono::Utc;
    use std::collections::BTreeMap;

    const SS_HK: &str = "ss://YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#HK%2001";
    const SS_HK_DUP_NAME: &str = "ss://YWVzLTI1Ni1nY206cGFzcw@5.6.7.8:8388#HK%2001";
    const TROJAN_JP: &str = "trojan://secret@jp.host.net:443?sni=jp.host.net#Japan%20Tokyo";

    fn snapshot() -> AggregationSnapshot {
        let nodes = [SS_HK, SS_HK_DUP_NAME, TROJAN_JP]
            .iter()
            .filter_map(|l| NodeRecord::parse(l))
            .collect();
        let reports = vec![SourceReport {
            index: 0,
            url: normalize("https://panel.host.net/api/v1/client/subscribe?token=pub001").unwrap(),
            outcome: SourceOutcome::Alive(DecodedSource {
                nodes,
                traffic: TrafficInfo::default(),
                path: DecodePath::FastPath,
                type_counts: BTreeMap::new(),
                status: 200,
                latency_ms: 120,
                rate_limit_hint: None,
            }),
        }];
        Aggregator::new(AggregateConfig::default()).aggregate(
            &reports,
            &[],
            &BTreeMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines(&[]), "");
        assert_eq!(join_lines(&["a", "b"]), "a\nb\n");
    }

    #[test]
    fn test_to_proxies_makes_names_unique() {
        let nodes: Vec<NodeRecord> = [SS_HK, SS_HK_DUP_NAME, "vmess://not-base64!"]
            .iter()
            .filter_map(|l| NodeRecord::parse(l))
            .collect();
        let proxies = to_proxies(&nodes);
        let names: Vec<&str> = proxies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["HK 01", "HK 01 2"]);
    }

    #[tokio::test]
    async fn test_publish_layout() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        let snap = snapshot();

        let written = publisher.publish(&snap).await.unwrap();
        assert_eq!(written, 1 + Protocol::ALL.len() + 1 + Region::CLASSIFIED.len() + 4 + 3);

        let all = std::fs::read_to_string(dir.path().join("sub/all.txt")).unwrap();
        assert_eq!(all.lines().count(), 3);
        assert!(all.ends_with('\n'));

        let ss = std::fs::read_to_string(dir.path().join("sub/proto/ss.txt")).unwrap();
        assert_eq!(ss.lines().count(), 2);
        let vless = std::fs::read_to_string(dir.path().join("sub/proto/vless.txt")).unwrap();
        assert!(vless.is_empty());

        let encoded = std::fs::read_to_string(dir.path().join("sub/proto/ss-base64.txt")).unwrap();
        assert_eq!(encoded, encode_standard(ss.as_bytes()));

        let hk = std::fs::read_to_string(dir.path().join("sub/regions/hk.txt")).unwrap();
        assert_eq!(hk.lines().count(), 2);

        let yaml = std::fs::read_to_string(dir.path().join("sub/good.yaml")).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["proxies"].as_sequence().unwrap().len(), 3);

        let urls = std::fs::read_to_string(dir.path().join("sub/urls.txt")).unwrap();
        assert!(urls.contains("token=pub001"));

        let health: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("health.json")).unwrap())
                .unwrap();
        assert_eq!(health["sources_alive"], 1);
        assert_eq!(health["nodes_published"], 3);
        assert!(!dir.path().join("health.tmp").exists());
    }
}
