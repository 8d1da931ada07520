//! トポロジー定義

use super::service::ServiceSpec;
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Topology - デプロイ対象サービスの集合
///
/// サービスは宣言順に保持され、実行計画のタイブレークに使用されます。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// プロジェクト名
    pub project: String,
    /// デフォルトのコンテナレジストリ（テンプレート）
    #[serde(default)]
    pub registry: Option<String>,
    /// 参照の有無にかかわらず必須とする変数
    #[serde(default)]
    pub required: Vec<String>,
    /// トポロジーで定義されたデフォルト変数（最も優先度が低い）
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// 宣言順のサービス
    pub services: Vec<ServiceSpec>,
    /// 相対パス解決の基準ディレクトリ
    #[serde(default)]
    pub root: PathBuf,
}

impl Topology {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// 指定サービスとその推移的な依存先だけを含むトポロジーを返す
    pub fn select(&self, targets: &[String]) -> Result<Topology> {
        let mut keep: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for target in targets {
            let service = self
                .service(target)
                .ok_or_else(|| FlowError::ServiceNotFound(target.clone()))?;
            stack.push(service.name.as_str());
        }

        while let Some(name) = stack.pop() {
            if !keep.insert(name) {
                continue;
            }
            if let Some(service) = self.service(name) {
                for dep in &service.depends_on {
                    stack.push(dep.as_str());
                }
            }
        }

        let services = self
            .services
            .iter()
            .filter(|s| keep.contains(s.name.as_str()))
            .cloned()
            .collect();

        Ok(Topology {
            services,
            ..self.clone()
        })
    }
}
