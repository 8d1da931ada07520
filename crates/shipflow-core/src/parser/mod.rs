//! トポロジーパーサー
//!
//! KDL形式（ship.kdl）とcompose風YAML形式（ship.yaml）をパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。
//! ここでは構文のみを扱い、名前の重複や依存先の存在確認は [`crate::loader`] で行います。

mod port;
mod service;
mod yaml;

pub use port::parse_port;
pub use service::parse_service;
pub use yaml::parse_yaml_string;

use crate::error::{FlowError, Result};
use crate::model::Topology;
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::HashMap;
use tracing::debug;

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Topology> {
    let doc: KdlDocument = content.parse()?;

    let mut topology = Topology {
        project: default_name,
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                topology.project = first_string(node).ok_or_else(|| {
                    FlowError::InvalidConfig("project には名前が必要です".to_string())
                })?;
            }
            "registry" => {
                topology.registry = Some(first_string(node).ok_or_else(|| {
                    FlowError::InvalidConfig("registry にはURLが必要です".to_string())
                })?);
            }
            "require" => {
                for name in string_arguments(node)? {
                    if !topology.required.contains(&name) {
                        topology.required.push(name);
                    }
                }
            }
            "variables" => {
                // プロジェクトレベルのデフォルト変数
                topology.variables.extend(parse_string_map(node)?);
            }
            "service" => {
                topology.services.push(parse_service(node)?);
            }
            other => {
                debug!(node = other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(topology)
}

/// 最初の位置引数を文字列として取得
pub(crate) fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// 全ての位置引数を文字列として取得
pub(crate) fn string_arguments(node: &KdlNode) -> Result<Vec<String>> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| {
            e.value().as_string().map(|s| s.to_string()).ok_or_else(|| {
                FlowError::InvalidConfig(format!(
                    "{} の引数は文字列で指定してください",
                    node.name().value()
                ))
            })
        })
        .collect()
}

/// KDLの値を文字列に変換（文字列・数値・真偽値を許可）
pub(crate) fn value_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        Some(s.to_string())
    } else if let Some(i) = value.as_integer() {
        Some(i.to_string())
    } else if let Some(f) = value.as_float() {
        Some(f.to_string())
    } else {
        value.as_bool().map(|b| b.to_string())
    }
}

/// `KEY "value"` 形式の子ノード一覧をマップとしてパース
pub(crate) fn parse_string_map(node: &KdlNode) -> Result<HashMap<String, String>> {
    Ok(parse_string_pairs(node)?.into_iter().collect())
}

/// `KEY "value"` 形式の子ノード一覧を宣言順のペアとしてパース
pub(crate) fn parse_string_pairs(node: &KdlNode) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = child
                .entries()
                .first()
                .map(|e| {
                    value_to_string(e.value()).ok_or_else(|| {
                        FlowError::InvalidConfig(format!(
                            "{} の {} に null は指定できません",
                            node.name().value(),
                            key
                        ))
                    })
                })
                .transpose()?
                .unwrap_or_default();
            pairs.push((key, value));
        }
    }
    Ok(pairs)
}
