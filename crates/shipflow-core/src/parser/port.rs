//! ポートノードのパース

use crate::model::{Port, Protocol};
use kdl::KdlNode;

fn to_port<T: TryInto<u16>>(value: T) -> Option<u16> {
    value.try_into().ok().filter(|p| *p != 0)
}

/// port ノードをパース
///
/// サポートされる形式:
/// - 名前付き引数: port host=8080 container=3000 protocol="udp"
/// - 位置引数: port 8080 3000
/// - 単一ポート: port 8080（host / container 共通）
pub fn parse_port(node: &KdlNode) -> Option<Port> {
    let positional: Vec<_> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_integer())
        .collect();

    // 名前付き引数を優先
    let host = match node.get("host").and_then(|v| v.as_integer()) {
        Some(v) => to_port(v)?,
        None => to_port(*positional.first()?)?,
    };

    let container = match node.get("container").and_then(|v| v.as_integer()) {
        Some(v) => to_port(v)?,
        None => match positional.get(1) {
            Some(v) => to_port(*v)?,
            None if node.get("host").is_some() => return None,
            None => host,
        },
    };

    let protocol = match node.get("protocol") {
        Some(value) => Protocol::parse(value.as_string()?)?,
        None => Protocol::Tcp,
    };

    Some(Port {
        host,
        container,
        protocol,
    })
}
