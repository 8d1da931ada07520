//! トポロジーローダー
//!
//! ファイル読み込み、形式判定、パース、整合性検証を統合します。
//! 副作用はファイルの読み込みのみです。

use crate::error::{FlowError, Result};
use crate::model::Topology;
use crate::parser::{parse_kdl_string, parse_yaml_string};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument};

/// トポロジーファイルの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyFormat {
    Kdl,
    Yaml,
}

impl TopologyFormat {
    /// 拡張子から形式を判定
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("kdl") => Ok(Self::Kdl),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            _ => Err(FlowError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// トポロジーファイルをロードして検証
///
/// 以下の処理を実行:
/// 1. 拡張子による形式判定
/// 2. ファイル読み込み
/// 3. パース
/// 4. 整合性検証（名前の重複、未定義の依存先、自己依存）
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_topology(path: &Path) -> Result<Topology> {
    let format = TopologyFormat::from_path(path)?;

    debug!(?format, "Reading topology file");
    let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // プロジェクト名のデフォルトはファイルの親ディレクトリ名
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let default_name = root
        .canonicalize()
        .ok()
        .as_deref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let mut topology = load_topology_str(&content, format, default_name)?;
    topology.root = root.to_path_buf();

    info!(
        project = %topology.project,
        services = topology.services.len(),
        "Topology loaded successfully"
    );

    Ok(topology)
}

/// 文字列からトポロジーをロードして検証
pub fn load_topology_str(
    content: &str,
    format: TopologyFormat,
    default_name: String,
) -> Result<Topology> {
    let topology = match format {
        TopologyFormat::Kdl => parse_kdl_string(content, default_name)?,
        TopologyFormat::Yaml => parse_yaml_string(content, default_name)?,
    };
    validate_topology(&topology)?;
    Ok(topology)
}

/// トポロジーの整合性を検証
pub fn validate_topology(topology: &Topology) -> Result<()> {
    let mut names: HashSet<&str> = HashSet::new();
    for service in &topology.services {
        if service.name.trim().is_empty() {
            return Err(FlowError::EmptyServiceName);
        }
        if !names.insert(service.name.as_str()) {
            return Err(FlowError::DuplicateService(service.name.clone()));
        }
    }

    for service in &topology.services {
        for dependency in &service.depends_on {
            if dependency == &service.name {
                return Err(FlowError::SelfDependency(service.name.clone()));
            }
            if !names.contains(dependency.as_str()) {
                return Err(FlowError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut env_names: HashSet<&str> = HashSet::new();
        for binding in &service.env {
            if !env_names.insert(binding.name.as_str()) {
                return Err(FlowError::DuplicateEnv {
                    service: service.name.clone(),
                    name: binding.name.clone(),
                });
            }
        }

        let mut host_ports: HashSet<(u16, crate::model::Protocol)> = HashSet::new();
        for port in &service.ports {
            if !host_ports.insert((port.host, port.protocol)) {
                return Err(FlowError::DuplicatePort {
                    service: service.name.clone(),
                    port: port.host,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn load_kdl(content: &str) -> Result<Topology> {
        load_topology_str(content, TopologyFormat::Kdl, "test".to_string())
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            TopologyFormat::from_path(Path::new("ship.kdl")).unwrap(),
            TopologyFormat::Kdl
        );
        assert_eq!(
            TopologyFormat::from_path(Path::new("ship.YML")).unwrap(),
            TopologyFormat::Yaml
        );
        assert!(matches!(
            TopologyFormat::from_path(Path::new("docker-compose.json")),
            Err(FlowError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_load_topology_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ship.kdl");
        fs::write(
            &path,
            r#"
            service "db" {}
            service "api" {
                depends_on "db"
            }
            "#,
        )
        .unwrap();

        let topology = load_topology(&path).unwrap();
        assert_eq!(topology.names(), vec!["db", "api"]);
        assert_eq!(topology.root, temp_dir.path());
        // プロジェクト名はディレクトリ名
        let dir_name = temp_dir.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(topology.project, dir_name);
    }

    #[test]
    fn test_load_topology_missing_file() {
        let err = load_topology(&PathBuf::from("/nonexistent/ship.kdl")).unwrap_err();
        assert!(matches!(err, FlowError::IoError { .. }));
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_duplicate_service_names() {
        let err = load_kdl(
            r#"
            service "api" {}
            service "api" {}
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateService(ref name) if name == "api"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = load_kdl(
            r#"
            service "api" {
                depends_on "databse"
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::UnknownDependency { ref service, ref dependency }
                if service == "api" && dependency == "databse"
        ));
    }

    #[test]
    fn test_self_dependency() {
        let err = load_kdl(
            r#"
            service "api" {
                depends_on "api"
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::SelfDependency(ref name) if name == "api"));
    }

    #[test]
    fn test_duplicate_env_binding() {
        let err = load_kdl(
            r#"
            service "api" {
                env {
                    KEY "a"
                    KEY "b"
                }
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateEnv { .. }));
    }

    #[test]
    fn test_duplicate_host_port() {
        let err = load_kdl(
            r#"
            service "api" {
                port 8080 80
                port 8080 81
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::DuplicatePort { port: 8080, .. }));
    }

    #[test]
    fn test_same_port_different_protocol_is_allowed() {
        let topology = load_kdl(
            r#"
            service "dns" {
                port 53
                port 53 protocol="udp"
            }
            "#,
        )
        .unwrap();
        assert_eq!(topology.service("dns").unwrap().ports.len(), 2);
    }

    #[test]
    fn test_empty_service_name() {
        let err = load_kdl(r#"service "" {}"#).unwrap_err();
        assert!(matches!(err, FlowError::EmptyServiceName));
    }

    #[test]
    fn test_cycle_is_not_a_load_error() {
        // 循環は planner で検出する
        let topology = load_kdl(
            r#"
            service "a" {
                depends_on "b"
            }
            service "b" {
                depends_on "a"
            }
            "#,
        )
        .unwrap();
        assert_eq!(topology.len(), 2);
    }
}
