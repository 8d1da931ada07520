//! ShipFlow の実行環境まわりの設定
//!
//! トポロジーファイルの探索と `.env` ファイルの読み込みを提供します。

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// トポロジーファイルを直接指定する環境変数
pub const TOPOLOGY_ENV: &str = "SHIP_TOPOLOGY";

/// 探索するファイル名（優先順）
pub const TOPOLOGY_CANDIDATES: &[&str] = &["ship.local.kdl", "ship.kdl", "ship.yaml", "ship.yml"];

/// グローバル設定ディレクトリ（~/.config/shipflow）
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shipflow"))
}

/// トポロジーファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 SHIP_TOPOLOGY (直接パス指定)
/// 2. カレントディレクトリ: ship.local.kdl, ship.kdl, ship.yaml, ship.yml
/// 3. ./.shipflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/shipflow/ship.kdl (グローバル設定)
pub fn find_topology_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(topology_path) = std::env::var(TOPOLOGY_ENV) {
        let path = PathBuf::from(topology_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::TopologyEnvPathNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリ → 3. ./.shipflow/
    for dir in [current_dir.clone(), current_dir.join(".shipflow")] {
        if let Some(path) = find_in_dir(&dir) {
            return Ok(path);
        }
    }

    // 4. グローバル設定ファイル
    if let Some(global) = config_dir().map(|dir| dir.join("ship.kdl")) {
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::TopologyNotFound)
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    TOPOLOGY_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .inspect(|path| debug!(path = %path.display(), "Found topology file"))
}

/// .env ファイルを読み込む
///
/// - `KEY=VALUE` 形式（値の前後の空白とクォートは除去）
/// - 空行と `#` で始まる行はスキップ
/// - `export KEY=VALUE` も受け付ける
///
/// 宣言順のペアを返します。同じキーが複数回現れた場合は後の値が優先されます。
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::EnvFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut pairs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();

        // 空行とコメント行をスキップ
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidEnvLine {
                path: path.to_path_buf(),
                line: index + 1,
            })?;

        pairs.push((key.trim().to_string(), strip_quotes(value.trim()).to_string()));
    }

    info!(variable_count = pairs.len(), "Loaded variables from .env file");
    Ok(pairs)
}

/// "value" や 'value' のクォートを除去
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// パニック時もカレントディレクトリを元に戻す
    struct RestoreDir(PathBuf);

    impl Drop for RestoreDir {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn in_dir<F: FnOnce()>(dir: &Path, f: F) {
        let _restore = RestoreDir(std::env::current_dir().unwrap());
        std::env::set_current_dir(dir).unwrap();
        f();
    }

    #[test]
    #[serial]
    fn test_in_dir_restores_cwd_after_panic() {
        let original_dir = std::env::current_dir().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();

        let dir = temp_dir.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            in_dir(&dir, || panic!("boom"));
        });

        assert!(result.is_err());
        assert_eq!(std::env::current_dir().unwrap(), original_dir);
    }

    #[test]
    #[serial]
    fn test_find_topology_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("ship.kdl"), "// test").unwrap();

        temp_env::with_var_unset(TOPOLOGY_ENV, || {
            in_dir(temp_dir.path(), || {
                let path = find_topology_file().unwrap();
                assert!(path.ends_with("ship.kdl"));
            });
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("ship.yaml"), "services: {}").unwrap();
        fs::write(temp_dir.path().join("ship.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join("ship.local.kdl"), "// local").unwrap();

        temp_env::with_var_unset(TOPOLOGY_ENV, || {
            in_dir(temp_dir.path(), || {
                // ship.local.kdl が優先される
                assert!(find_topology_file().unwrap().ends_with("ship.local.kdl"));
            });
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_yaml_fallback() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("ship.yml"), "services: {}").unwrap();

        temp_env::with_var_unset(TOPOLOGY_ENV, || {
            in_dir(temp_dir.path(), || {
                assert!(find_topology_file().unwrap().ends_with("ship.yml"));
            });
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_in_shipflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ship_dir = temp_dir.path().join(".shipflow");
        fs::create_dir(&ship_dir).unwrap();
        fs::write(ship_dir.join("ship.kdl"), "// in .shipflow").unwrap();

        temp_env::with_var_unset(TOPOLOGY_ENV, || {
            in_dir(temp_dir.path(), || {
                assert!(find_topology_file().unwrap().ends_with(".shipflow/ship.kdl"));
            });
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let topology_path = temp_dir.path().join("custom.kdl");
        fs::write(&topology_path, "// custom").unwrap();

        temp_env::with_var(TOPOLOGY_ENV, Some(topology_path.as_os_str()), || {
            assert_eq!(find_topology_file().unwrap(), topology_path);
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_env_var_missing_file() {
        temp_env::with_var(TOPOLOGY_ENV, Some("/nonexistent/ship.kdl"), || {
            assert!(matches!(
                find_topology_file(),
                Err(ConfigError::TopologyEnvPathNotFound(_))
            ));
        });
    }

    #[test]
    #[serial]
    fn test_find_topology_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fake_home = tempfile::tempdir().unwrap();

        temp_env::with_vars(
            [
                (TOPOLOGY_ENV, None),
                ("XDG_CONFIG_HOME", Some(fake_home.path().as_os_str())),
                ("HOME", Some(fake_home.path().as_os_str())),
            ],
            || {
                in_dir(temp_dir.path(), || {
                    assert!(matches!(
                        find_topology_file(),
                        Err(ConfigError::TopologyNotFound)
                    ));
                });
            },
        );
    }

    #[test]
    fn test_load_env_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env_file = temp_dir.path().join(".env");
        fs::write(
            &env_file,
            r#"
# Artifact Registry
PROJECT_ID=shop-prod
export REGION = asia-northeast1
GEMINI_API_KEY="abc=def"
GREETING='hello world'
EMPTY=
"#,
        )
        .unwrap();

        let pairs = load_env_file(&env_file).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("PROJECT_ID".to_string(), "shop-prod".to_string()),
                ("REGION".to_string(), "asia-northeast1".to_string()),
                ("GEMINI_API_KEY".to_string(), "abc=def".to_string()),
                ("GREETING".to_string(), "hello world".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_load_env_file_invalid_line() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env_file = temp_dir.path().join(".env");
        fs::write(&env_file, "A=1\nnot a pair\n").unwrap();

        match load_env_file(&env_file) {
            Err(ConfigError::InvalidEnvLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_load_env_file_missing() {
        let result = load_env_file(Path::new("/nonexistent/.env"));
        assert!(matches!(result, Err(ConfigError::EnvFileRead { .. })));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"x\""), "x");
        assert_eq!(strip_quotes("'x'"), "x");
        assert_eq!(strip_quotes("\"x"), "\"x");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
