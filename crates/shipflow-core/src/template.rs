//! テンプレート展開
//!
//! `${VAR}` / `${VAR:-default}` 形式のプレースホルダーを変数セットで展開します。
//! `$$` はリテラルの `$` として扱います。

use crate::error::{FlowError, Result};
use crate::model::{EnvValue, Topology};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

static VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable name pattern is valid")
});

/// テンプレート内の変数参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub default: Option<String>,
}

/// 変数セット
///
/// 後から追加された値が優先されます。
/// 優先順位（低 → 高）: トポロジーの variables → .env ファイル → プロセス環境変数 → `--set`
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// トポロジーの `variables` をベースに作成
    pub fn from_topology(topology: &Topology) -> Self {
        let mut vars = Self::new();
        vars.extend(
            topology
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        vars
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in iter {
            self.values.insert(key, value);
        }
    }

    /// プロセスの環境変数を追加
    pub fn add_process_env(&mut self) {
        let before = self.values.len();
        self.extend(std::env::vars());
        debug!(
            added = self.values.len().saturating_sub(before),
            "Added process environment variables"
        );
    }

    /// `KEY=VALUE` 形式の上書き指定を追加
    pub fn add_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| FlowError::InvalidVariable(assignment.to_string()))?;
        let key = key.trim();
        if !VARIABLE_NAME.is_match(key) {
            return Err(FlowError::InvalidVariable(assignment.to_string()));
        }
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// プレースホルダー（または `$$`）を含むか
pub fn has_placeholders(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

/// テンプレート内の変数参照を出現順に取得
pub fn references(template: &str) -> Vec<Placeholder> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| {
            caps.get(1).map(|name| Placeholder {
                name: name.as_str().to_string(),
                default: caps.get(2).map(|d| d.as_str().to_string()),
            })
        })
        .collect()
}

/// テンプレートを展開
///
/// デフォルト値のない未定義変数があれば、そのすべてを `MissingVariables` で返します。
pub fn render(template: &str, vars: &Variables) -> Result<String> {
    let mut missing = Vec::new();

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let Some(name) = caps.get(1) else {
            return "$".to_string();
        };
        match (vars.get(name.as_str()), caps.get(2)) {
            (Some(value), _) => value.to_string(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.push(name.as_str().to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(FlowError::MissingVariables(missing));
    }

    Ok(rendered.into_owned())
}

/// 環境変数の値を展開
pub fn render_env_value(value: &EnvValue, vars: &Variables) -> Result<String> {
    match value {
        EnvValue::Literal(s) => Ok(s.clone()),
        EnvValue::Template(s) => render(s, vars),
    }
}

/// トポロジー全体で必須となる変数を列挙（重複なし、出現順）
///
/// - デフォルト値を持たないすべてのプレースホルダー
/// - トポロジーの `require`
/// - 呼び出し側から追加指定された変数
pub fn required_variables(topology: &Topology, extra: &[String]) -> Vec<String> {
    let mut required: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !required.iter().any(|r| r == name) {
            required.push(name.to_string());
        }
    };

    for name in topology.required.iter().chain(extra.iter()) {
        push(name);
    }

    let mut templates: Vec<&str> = Vec::new();
    if let Some(registry) = &topology.registry {
        templates.push(registry);
    }
    for service in &topology.services {
        if let Some(image) = &service.image {
            templates.push(image);
        }
        templates.extend(service.build.args.values().map(|v| v.as_str()));
        templates.extend(service.env.iter().map(|b| b.value.raw()));
    }

    for template in templates {
        for placeholder in references(template) {
            // REGISTRY は registry 宣言から補完される
            if placeholder.default.is_none()
                && !(placeholder.name == "REGISTRY" && topology.registry.is_some())
            {
                push(&placeholder.name);
            }
        }
    }

    required
}

/// 必須変数がすべて存在するか検証
pub fn check_required(topology: &Topology, vars: &Variables, extra: &[String]) -> Result<()> {
    let missing: Vec<String> = required_variables(topology, extra)
        .into_iter()
        .filter(|name| !vars.contains(name))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FlowError::MissingVariables(missing))
    }
}
