//! ポート定義

use serde::{Deserialize, Serialize};

/// ポート公開設定
///
/// `container` はサービスが待ち受けるポート、`host` は外部に公開するポートです。
/// マネージド実行基盤へのデプロイでは `container` のみが使用されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Port {
    /// ホスト側とコンテナ側が同じポート
    pub fn same(port: u16) -> Self {
        Self {
            host: port,
            container: port,
            protocol: Protocol::Tcp,
        }
    }

    /// compose形式のポート指定をパース
    ///
    /// - `"8080"` → 8080:8080
    /// - `"8080:80"` → host 8080, container 80
    /// - `"8080:80/udp"` → UDP
    pub fn parse(spec: &str) -> Option<Self> {
        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, proto)) => (ports, Protocol::parse(proto)?),
            None => (spec, Protocol::Tcp),
        };

        let (host, container) = match ports.split_once(':') {
            Some((host, container)) => (host.trim().parse().ok()?, container.trim().parse().ok()?),
            None => {
                let port = ports.trim().parse().ok()?;
                (port, port)
            }
        };

        Some(Self {
            host,
            container,
            protocol,
        })
    }
}

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// 文字列からProtocolをパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_port() {
        assert_eq!(Port::parse("8080"), Some(Port::same(8080)));
    }

    #[test]
    fn test_parse_mapped_port() {
        let port = Port::parse("8080:80").unwrap();
        assert_eq!(port.host, 8080);
        assert_eq!(port.container, 80);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_parse_udp_port() {
        let port = Port::parse("5353:53/udp").unwrap();
        assert_eq!(port.protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_invalid_port() {
        assert_eq!(Port::parse("http"), None);
        assert_eq!(Port::parse("80:80/sctp"), None);
        assert_eq!(Port::parse("70000"), None);
    }
}
