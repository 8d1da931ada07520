use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("YAMLパースエラー: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("サポートされていないトポロジー形式です: {0}（.kdl / .yaml / .yml のみ）")]
    UnsupportedFormat(PathBuf),

    #[error("サービス名が重複しています: {0}")]
    DuplicateService(String),

    #[error("サービス名が空です")]
    EmptyServiceName,

    #[error("サービス '{service}' が未定義のサービス '{dependency}' に依存しています")]
    UnknownDependency { service: String, dependency: String },

    #[error("サービス '{0}' が自分自身に依存しています")]
    SelfDependency(String),

    #[error("サービス '{service}' の環境変数 '{name}' が重複しています")]
    DuplicateEnv { service: String, name: String },

    #[error("サービス '{service}' のホストポート {port} が重複しています")]
    DuplicatePort { service: String, port: u16 },

    #[error("サービスが見つかりません: {0}")]
    ServiceNotFound(String),

    #[error("循環依存が検出されました: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("必須の環境変数が設定されていません: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("無効な変数指定: {0}")]
    InvalidVariable(String),

    #[error("サービス '{service}' のイメージ参照が無効です: {reason}")]
    InvalidImage { service: String, reason: String },

    #[error("サービス '{service}' のビルドコンテキストが見つかりません: {path}")]
    ContextNotFound { service: String, path: PathBuf },
}

/// エラーの分類
///
/// CLIの終了コードと、どの段階で実行が中断されたかの判定に使用します。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 構文エラー（トポロジーファイルが読めない、形式が不正）
    Parse,
    /// トポロジーの内容が矛盾している
    Validation,
    /// 依存関係が循環している
    Cycle,
    /// 環境変数などの入力が不足・不正
    Config,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::KdlParse(_)
            | FlowError::YamlParse(_)
            | FlowError::IoError { .. }
            | FlowError::InvalidConfig(_)
            | FlowError::UnsupportedFormat(_) => ErrorKind::Parse,
            FlowError::DuplicateService(_)
            | FlowError::EmptyServiceName
            | FlowError::UnknownDependency { .. }
            | FlowError::SelfDependency(_)
            | FlowError::DuplicateEnv { .. }
            | FlowError::DuplicatePort { .. }
            | FlowError::ServiceNotFound(_) => ErrorKind::Validation,
            FlowError::CircularDependency(_) => ErrorKind::Cycle,
            FlowError::MissingVariables(_)
            | FlowError::InvalidVariable(_)
            | FlowError::InvalidImage { .. }
            | FlowError::ContextNotFound { .. } => ErrorKind::Config,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            FlowError::MissingVariables(names) => {
                let exports: Vec<String> =
                    names.iter().map(|n| format!("   export {}=...", n)).collect();
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. 環境変数を設定してください:\n{}\n\
                     2. または --env-file / --set で値を渡してください",
                    self,
                    exports.join("\n")
                )
            }
            FlowError::CircularDependency(_) => {
                format!(
                    "{}\n\
                     \n\
                     depends_on の定義を確認し、循環を解消してください。",
                    self
                )
            }
            FlowError::UnknownDependency { .. } => {
                format!(
                    "{}\n\
                     \n\
                     depends_on に指定したサービス名のタイプミスを確認してください。",
                    self
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            FlowError::InvalidConfig("x".into()).kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            FlowError::DuplicateService("api".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            FlowError::CircularDependency(vec!["a".into(), "b".into()]).kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            FlowError::MissingVariables(vec!["PROJECT_ID".into()]).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_cycle_error_names_services() {
        let err = FlowError::CircularDependency(vec!["a".into(), "b".into()]);
        let message = err.to_string();
        assert!(message.contains("a"));
        assert!(message.contains("b"));
    }

    #[test]
    fn test_missing_variables_user_message() {
        let err = FlowError::MissingVariables(vec!["PROJECT_ID".into()]);
        let message = err.user_message();
        assert!(message.contains("PROJECT_ID"));
        assert!(message.contains("export PROJECT_ID"));
    }
}
