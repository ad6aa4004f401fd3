//! Conversion between share links and clash proxy entries

use serde_json::json;
use serde_yaml::{Mapping, Value};
use url::Url;

use super::clash::ClashProxy;
use super::encoding::{
    decode_lenient_text, encode_standard, encode_url_safe, percent_decode, percent_encode,
};

/// Express a clash entry as a share link; `None` for types without one
pub fn proxy_to_link(proxy: &ClashProxy) -> Option<String> {
    if proxy.server.is_empty() || proxy.port == 0 {
        return None;
    }

    let host = host_part(&proxy.server);
    let port = proxy.port;
    let name = percent_encode(&proxy.name);

    match proxy.kind.to_lowercase().as_str() {
        "ss" => {
            let cipher = proxy.str_field("cipher")?;
            let password = proxy.str_field("password")?;
            let userinfo = encode_url_safe(format!("{}:{}", cipher, password).as_bytes());
            Some(format!("ss://{}@{}:{}#{}", userinfo, host, port, name))
        }
        "ssr" => {
            let password = encode_url_safe(proxy.str_field("password")?.as_bytes());
            let body = format!(
                "{}:{}:{}:{}:{}:{}/?remarks={}",
                proxy.server,
                port,
                proxy.str_field("protocol").unwrap_or("origin"),
                proxy.str_field("cipher")?,
                proxy.str_field("obfs").unwrap_or("plain"),
                password,
                encode_url_safe(proxy.name.as_bytes()),
            );
            Some(format!("ssr://{}", encode_url_safe(body.as_bytes())))
        }
        "vmess" => {
            let uuid = proxy.str_field("uuid")?;
            let payload = json!({
                "v": "2",
                "ps": proxy.name,
                "add": proxy.server,
                "port": port.to_string(),
                "id": uuid,
                "aid": proxy.int_field("alterId").unwrap_or(0).to_string(),
                "scy": proxy.str_field("cipher").unwrap_or("auto"),
                "net": proxy.str_field("network").unwrap_or("tcp"),
                "type": "none",
                "host": ws_host(proxy).unwrap_or(""),
                "path": proxy.nested_str("ws-opts", "path").unwrap_or(""),
                "tls": if proxy.bool_field("tls") { "tls" } else { "" },
                "sni": proxy.str_field("servername").unwrap_or(""),
            });
            Some(format!("vmess://{}", encode_standard(payload.to_string().as_bytes())))
        }
        "vless" => {
            let uuid = proxy.str_field("uuid")?;
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            query.append_pair("encryption", "none");
            if proxy.extra.contains_key("reality-opts") {
                query.append_pair("security", "reality");
                if let Some(pbk) = proxy.nested_str("reality-opts", "public-key") {
                    query.append_pair("pbk", pbk);
                }
                if let Some(sid) = proxy.nested_str("reality-opts", "short-id") {
                    query.append_pair("sid", sid);
                }
            } else if proxy.bool_field("tls") {
                query.append_pair("security", "tls");
            }
            query.append_pair("type", proxy.str_field("network").unwrap_or("tcp"));
            if let Some(sni) = proxy.str_field("servername") {
                query.append_pair("sni", sni);
            }
            if let Some(flow) = proxy.str_field("flow") {
                query.append_pair("flow", flow);
            }
            if let Some(fp) = proxy.str_field("client-fingerprint") {
                query.append_pair("fp", fp);
            }
            if let Some(path) = proxy.nested_str("ws-opts", "path") {
                query.append_pair("path", path);
            }
            if let Some(ws_host) = ws_host(proxy) {
                query.append_pair("host", ws_host);
            }
            Some(format!(
                "vless://{}@{}:{}?{}#{}",
                uuid,
                host,
                port,
                query.finish(),
                name
            ))
        }
        "trojan" => {
            let password = percent_encode(proxy.str_field("password")?);
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            if let Some(sni) = proxy.str_field("sni") {
                query.append_pair("sni", sni);
            }
            if proxy.bool_field("skip-cert-verify") {
                query.append_pair("allowInsecure", "1");
            }
            if let Some(network) = proxy.str_field("network").filter(|n| *n != "tcp") {
                query.append_pair("type", network);
            }
            Some(with_query(
                format!("trojan://{}@{}:{}", password, host, port),
                query.finish(),
                &name,
            ))
        }
        "hysteria2" | "hy2" => {
            let password = percent_encode(proxy.str_field("password")?);
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            if let Some(sni) = proxy.str_field("sni") {
                query.append_pair("sni", sni);
            }
            if proxy.bool_field("skip-cert-verify") {
                query.append_pair("insecure", "1");
            }
            if let Some(obfs) = proxy.str_field("obfs") {
                query.append_pair("obfs", obfs);
            }
            if let Some(obfs_password) = proxy.str_field("obfs-password") {
                query.append_pair("obfs-password", obfs_password);
            }
            Some(with_query(
                format!("hysteria2://{}@{}:{}", password, host, port),
                query.finish(),
                &name,
            ))
        }
        _ => None,
    }
}

/// Parse a share link into a clash entry; `None` when fields are missing
pub fn link_to_proxy(link: &str) -> Option<ClashProxy> {
    let link = link.trim();
    let (scheme, rest) = link.split_once("://")?;

    match scheme.to_lowercase().as_str() {
        "ss" => parse_ss(rest),
        "ssr" => parse_ssr(rest),
        "vmess" => parse_vmess(rest),
        "vless" | "trojan" | "hysteria2" | "hy2" => parse_authority_link(link),
        _ => None,
    }
}

fn parse_ss(rest: &str) -> Option<ClashProxy> {
    let (body, fragment) = split_fragment(rest);
    let body = body.split('?').next().unwrap_or_default();

    let (userinfo, host_port) = match body.rsplit_once('@') {
        Some((userinfo, host_port)) => {
            let decoded = percent_decode(userinfo);
            let credentials = if decoded.contains(':') {
                decoded
            } else {
                decode_lenient_text(userinfo)?
            };
            (credentials, host_port.trim_end_matches('/').to_string())
        }
        None => {
            let decoded = decode_lenient_text(body)?;
            let (userinfo, host_port) = decoded.rsplit_once('@')?;
            (userinfo.to_string(), host_port.to_string())
        }
    };

    let (cipher, password) = userinfo.split_once(':')?;
    let (server, port) = split_host_port(host_port.trim())?;
    let name = fragment.unwrap_or_else(|| format!("ss-{}:{}", server, port));

    Some(
        ClashProxy::new(name, "ss", server, port)
            .with("cipher", cipher)
            .with("password", password)
            .with("udp", true),
    )
}

fn parse_ssr(rest: &str) -> Option<ClashProxy> {
    let decoded = decode_lenient_text(rest)?;
    let (main, params) = decoded
        .split_once("/?")
        .map(|(m, p)| (m.to_string(), p.to_string()))
        .unwrap_or_else(|| (decoded.clone(), String::new()));

    // server may itself contain ':' (IPv6), so split from the right
    let mut parts = main.rsplitn(6, ':');
    let password = decode_lenient_text(parts.next()?)?;
    let obfs = parts.next()?;
    let cipher = parts.next()?;
    let protocol = parts.next()?;
    let port: u16 = parts.next()?.parse().ok()?;
    let server = parts.next()?.to_string();

    let name = url::form_urlencoded::parse(params.as_bytes())
        .find(|(k, _)| k == "remarks")
        .and_then(|(_, v)| decode_lenient_text(&v))
        .unwrap_or_else(|| format!("ssr-{}:{}", server, port));

    Some(
        ClashProxy::new(name, "ssr", server, port)
            .with("cipher", cipher)
            .with("password", password)
            .with("protocol", protocol)
            .with("obfs", obfs),
    )
}

fn parse_vmess(rest: &str) -> Option<ClashProxy> {
    let (body, _) = split_fragment(rest);
    let json: serde_json::Value = serde_json::from_str(&decode_lenient_text(body)?).ok()?;
    let field = |key: &str| -> Option<String> {
        match json.get(key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let server = field("add")?;
    let port: u16 = field("port")?.parse().ok()?;
    let uuid = field("id")?;
    let name = field("ps").unwrap_or_else(|| format!("vmess-{}:{}", server, port));
    let network = field("net").unwrap_or_else(|| "tcp".to_string());
    let alter_id: i64 = field("aid").and_then(|a| a.parse().ok()).unwrap_or(0);

    let mut proxy = ClashProxy::new(name, "vmess", server, port)
        .with("uuid", uuid)
        .with("alterId", alter_id)
        .with("cipher", field("scy").unwrap_or_else(|| "auto".to_string()))
        .with("udp", true);

    if field("tls").as_deref() == Some("tls") {
        proxy = proxy.with("tls", true);
        if let Some(sni) = field("sni") {
            proxy = proxy.with("servername", sni);
        }
    }
    if network != "tcp" {
        proxy = proxy.with("network", network.as_str());
    }
    if network == "ws" {
        proxy = proxy.with("ws-opts", ws_opts(field("path"), field("host")));
    }

    Some(proxy)
}

/// vless, trojan and hysteria2 share the `scheme://secret@host:port?query#name` shape
fn parse_authority_link(link: &str) -> Option<ClashProxy> {
    let url = Url::parse(link).ok()?;
    let server = url.host_str()?.trim_matches(['[', ']']).to_string();
    let port = url.port().unwrap_or(443);
    let secret = percent_decode(url.username());
    if secret.is_empty() {
        return None;
    }

    let query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let param = |key: &str| -> Option<&str> {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    };

    let kind = match url.scheme() {
        "hy2" => "hysteria2",
        other => other,
    };
    let name = url
        .fragment()
        .map(percent_decode)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}-{}:{}", kind, server, port));

    let mut proxy = ClashProxy::new(name, kind, server, port).with("udp", true);

    match kind {
        "vless" => {
            proxy = proxy.with("uuid", secret);
            match param("security") {
                Some("tls") => proxy = proxy.with("tls", true),
                Some("reality") => {
                    let mut opts = Mapping::new();
                    if let Some(pbk) = param("pbk") {
                        opts.insert("public-key".into(), pbk.into());
                    }
                    if let Some(sid) = param("sid") {
                        opts.insert("short-id".into(), sid.into());
                    }
                    proxy = proxy.with("tls", true).with("reality-opts", opts);
                }
                _ => {}
            }
            if let Some(sni) = param("sni") {
                proxy = proxy.with("servername", sni);
            }
            if let Some(flow) = param("flow") {
                proxy = proxy.with("flow", flow);
            }
            if let Some(fp) = param("fp") {
                proxy = proxy.with("client-fingerprint", fp);
            }
            let network = param("type").unwrap_or("tcp");
            if network != "tcp" {
                proxy = proxy.with("network", network);
            }
            if network == "ws" {
                proxy = proxy.with(
                    "ws-opts",
                    ws_opts(param("path").map(str::to_string), param("host").map(str::to_string)),
                );
            }
        }
        "trojan" => {
            proxy = proxy.with("password", secret);
            if let Some(sni) = param("sni").or_else(|| param("peer")) {
                proxy = proxy.with("sni", sni);
            }
            if param("allowInsecure") == Some("1") {
                proxy = proxy.with("skip-cert-verify", true);
            }
            if let Some(network) = param("type").filter(|n| *n != "tcp") {
                proxy = proxy.with("network", network);
            }
        }
        _ => {
            let password = match url.password() {
                Some(pass) => format!("{}:{}", secret, percent_decode(pass)),
                None => secret,
            };
            proxy = proxy.with("password", password);
            if let Some(sni) = param("sni") {
                proxy = proxy.with("sni", sni);
            }
            if param("insecure") == Some("1") {
                proxy = proxy.with("skip-cert-verify", true);
            }
            if let Some(obfs) = param("obfs") {
                proxy = proxy.with("obfs", obfs);
            }
            if let Some(obfs_password) = param("obfs-password") {
                proxy = proxy.with("obfs-password", obfs_password);
            }
        }
    }

    Some(proxy)
}

fn ws_opts(path: Option<String>, host: Option<String>) -> Mapping {
    let mut opts = Mapping::new();
    opts.insert("path".into(), path.unwrap_or_else(|| "/".to_string()).into());
    if let Some(host) = host {
        let mut headers = Mapping::new();
        headers.insert("Host".into(), host.into());
        opts.insert("headers".into(), Value::Mapping(headers));
    }
    opts
}

fn ws_host(proxy: &ClashProxy) -> Option<&str> {
    proxy
        .extra
        .get("ws-opts")?
        .get("headers")?
        .get("Host")?
        .as_str()
}

fn split_fragment(rest: &str) -> (&str, Option<String>) {
    match rest.split_once('#') {
        Some((body, fragment)) => {
            let name = percent_decode(fragment);
            (body, (!name.is_empty()).then_some(name))
        }
        None => (rest, None),
    }
}

fn split_host_port(host_port: &str) -> Option<(String, u16)> {
    let (host, port) = host_port.rsplit_once(':')?;
    let host = host.trim_matches(['[', ']']);
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

fn host_part(server: &str) -> String {
    if server.contains(':') {
        format!("[{}]", server)
    } else {
        server.to_string()
    }
}

fn with_query(base: String, query: String, name: &str) -> String {
    if query.is_empty() {
        format!("{}#{}", base, name)
    } else {
        format!("{}?{}#{}", base, query, name)
    }
}
