//! サービスノードのパース

use super::port::parse_port;
use super::{first_string, parse_string_pairs, string_arguments};
use crate::error::{FlowError, Result};
use crate::model::{BuildSpec, EnvBinding, ServiceSpec};
use kdl::{KdlDocument, KdlNode};
use std::path::PathBuf;

/// service ノードをパース
pub fn parse_service(node: &KdlNode) -> Result<ServiceSpec> {
    let name = first_string(node)
        .ok_or_else(|| FlowError::InvalidConfig("service には名前が必要です".to_string()))?;

    let mut service = ServiceSpec::new(name);

    // service "api" image="..." のプロパティ記法
    if let Some(image) = node.get("image").and_then(|v| v.as_string()) {
        service.image = Some(image.to_string());
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    service.image = Some(required_string(&service.name, child)?);
                }
                "port" => {
                    service.ports.push(port_or_error(&service.name, child)?);
                }
                "ports" => {
                    if let Some(ports) = child.children() {
                        for port_node in ports.nodes() {
                            if port_node.name().value() == "port" {
                                service.ports.push(port_or_error(&service.name, port_node)?);
                            }
                        }
                    }
                }
                // env と environment 両方をサポート
                "environment" | "env" => {
                    if child.children().is_some() {
                        for (key, value) in parse_string_pairs(child)? {
                            service.env.push(EnvBinding::new(key, &value));
                        }
                    } else {
                        // 子ノードがない場合は、フラットな env "KEY=VALUE" 形式をサポート
                        for entry in string_arguments(child)? {
                            let (key, value) = entry.split_once('=').ok_or_else(|| {
                                FlowError::InvalidConfig(format!(
                                    "サービス '{}' の env は KEY=VALUE 形式で指定してください: {}",
                                    service.name, entry
                                ))
                            })?;
                            service.env.push(EnvBinding::new(key.trim(), value.trim()));
                        }
                    }
                }
                "depends_on" => {
                    for dependency in string_arguments(child)? {
                        service.add_dependency(dependency);
                    }
                }
                // ビルド関連フィールド（フラット記法）
                "context" => {
                    service.build.context = PathBuf::from(required_string(&service.name, child)?);
                }
                "dockerfile" => {
                    service.build.dockerfile =
                        Some(PathBuf::from(required_string(&service.name, child)?));
                }
                "target" => {
                    service.build.target = Some(required_string(&service.name, child)?);
                }
                "build_args" => {
                    service.build.args.extend(parse_string_pairs(child)?);
                }
                // build "./api" または build { context "./api" ... }
                "build" => {
                    if let Some(context) = first_string(child) {
                        service.build.context = PathBuf::from(context);
                    }
                    if let Some(build_children) = child.children() {
                        parse_build_config(build_children, &mut service.build)?;
                    }
                }
                other => {
                    tracing::debug!(
                        service = %service.name,
                        node = other,
                        "Skipping unknown service node"
                    );
                }
            }
        }
    }

    Ok(service)
}

/// buildブロックをパース（ネスト記法用）
fn parse_build_config(doc: &KdlDocument, build: &mut BuildSpec) -> Result<()> {
    for node in doc.nodes() {
        match node.name().value() {
            "context" => {
                if let Some(path) = first_string(node) {
                    build.context = PathBuf::from(path);
                }
            }
            "dockerfile" => {
                if let Some(path) = first_string(node) {
                    build.dockerfile = Some(PathBuf::from(path));
                }
            }
            "target" => {
                if let Some(target) = first_string(node) {
                    build.target = Some(target);
                }
            }
            "args" => {
                build.args.extend(parse_string_pairs(node)?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn required_string(service: &str, node: &KdlNode) -> Result<String> {
    first_string(node).ok_or_else(|| {
        FlowError::InvalidConfig(format!(
            "サービス '{}' の {} には文字列を指定してください",
            service,
            node.name().value()
        ))
    })
}

fn port_or_error(service: &str, node: &KdlNode) -> Result<crate::model::Port> {
    parse_port(node).ok_or_else(|| {
        FlowError::InvalidConfig(format!(
            "サービス '{}' のポート指定が不正です: {}",
            service,
            node.to_string().trim()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdl::KdlDocument;

    fn parse_one(kdl: &str) -> Result<ServiceSpec> {
        let doc: KdlDocument = kdl.parse().unwrap();
        let node = doc.nodes().first().unwrap();
        parse_service(node)
    }

    #[test]
    fn test_parse_service_name_required() {
        let result = parse_one("service { image \"a\" }");
        assert!(matches!(result, Err(FlowError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_image_property() {
        let service = parse_one(r#"service "api" image="myapp:1.0""#).unwrap();
        assert_eq!(service.image, Some("myapp:1.0".to_string()));
    }

    #[test]
    fn test_parse_build_shorthand() {
        let service = parse_one(
            r#"
            service "api" {
                build "./api"
            }
            "#,
        )
        .unwrap();
        assert_eq!(service.build.context, PathBuf::from("./api"));
    }

    #[test]
    fn test_parse_flat_build_fields() {
        let service = parse_one(
            r#"
            service "api" {
                context "./backend"
                dockerfile "docker/Dockerfile.prod"
                target "runtime"
                build_args {
                    PYTHON_VERSION "3.12"
                }
            }
            "#,
        )
        .unwrap();
        assert_eq!(service.build.context, PathBuf::from("./backend"));
        assert_eq!(
            service.build.dockerfile,
            Some(PathBuf::from("docker/Dockerfile.prod"))
        );
        assert_eq!(service.build.target.as_deref(), Some("runtime"));
        assert_eq!(service.build.args["PYTHON_VERSION"], "3.12");
    }

    #[test]
    fn test_parse_flat_env() {
        let service = parse_one(
            r#"
            service "bot" {
                env "MODE=polling" "LOG_LEVEL=debug"
            }
            "#,
        )
        .unwrap();
        assert_eq!(service.env.len(), 2);
        assert_eq!(service.env[0].name, "MODE");
        assert_eq!(service.env[1].value.raw(), "debug");
    }

    #[test]
    fn test_parse_invalid_port() {
        let result = parse_one(
            r#"
            service "api" {
                port "http"
            }
            "#,
        );
        assert!(matches!(result, Err(FlowError::InvalidConfig(_))));
    }
}
