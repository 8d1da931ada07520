//! サービス定義

use super::port::Port;
use crate::template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// サービス定義
///
/// KDL形式：
/// ```kdl
/// service "api" {
///     image "${REGISTRY}/api:latest"
///     build {
///         context "./api"
///     }
///     env {
///         GEMINI_API_KEY "${GEMINI_API_KEY}"
///     }
///     port 8080
///     depends_on "db"
/// }
/// ```
///
/// ロード後は不変として扱い、変数展開は [`crate::resolver`] で別の値として生成します。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// イメージ参照（テンプレート）。未指定の場合は registry / project から自動生成
    pub image: Option<String>,
    #[serde(default)]
    pub build: BuildSpec,
    /// 宣言順を保持した環境変数バインディング
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 依存先を追加（重複は無視）
    pub fn add_dependency(&mut self, dependency: impl Into<String>) {
        let dependency = dependency.into();
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
    }

}

/// ビルド設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// ビルドコンテキストのパス（トポロジーファイルからの相対パス）
    pub context: PathBuf,
    /// Dockerfileのパス（コンテキストからの相対パス）
    pub dockerfile: Option<PathBuf>,
    /// マルチステージビルドのターゲット
    pub target: Option<String>,
    /// ビルド引数（値はテンプレート）
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            context: PathBuf::from("."),
            dockerfile: None,
            target: None,
            args: BTreeMap::new(),
        }
    }
}

/// 環境変数バインディング
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: EnvValue,
}

impl EnvBinding {
    pub fn new(name: impl Into<String>, raw: &str) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::parse(raw),
        }
    }
}

/// 環境変数の値
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvValue {
    /// そのまま渡す値
    Literal(String),
    /// `${VAR}` / `${VAR:-default}` を含む値。デプロイ前に展開する
    Template(String),
}

impl EnvValue {
    pub fn parse(raw: &str) -> Self {
        if template::has_placeholders(raw) {
            EnvValue::Template(raw.to_string())
        } else {
            EnvValue::Literal(raw.to_string())
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            EnvValue::Literal(s) | EnvValue::Template(s) => s,
        }
    }
}
