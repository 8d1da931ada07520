use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "トポロジーファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: ship.local.kdl, ship.kdl, ship.yaml, ship.yml\n\
        - ./.shipflow/ ディレクトリ\n\
        - ~/.config/shipflow/ship.kdl\n\
        または SHIP_TOPOLOGY 環境変数で直接指定できます"
    )]
    TopologyNotFound,

    #[error("SHIP_TOPOLOGY で指定されたファイルが存在しません: {0}")]
    TopologyEnvPathNotFound(PathBuf),

    #[error(".env ファイルを読み込めません: {path}\n理由: {source}")]
    EnvFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(".env ファイルの {line} 行目が KEY=VALUE 形式ではありません: {path}")]
    InvalidEnvLine { path: PathBuf, line: usize },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
