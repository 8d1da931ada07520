//! compose風YAMLトポロジーのパース
//!
//! ```yaml
//! project: shopping-assistant
//! registry: ${REGION}-docker.pkg.dev/${PROJECT_ID}/assistant
//! services:
//!   api:
//!     build: ./api
//!     env:
//!       GEMINI_API_KEY: ${GEMINI_API_KEY}
//!     ports: ["8080"]
//!   telegram-bot:
//!     build:
//!       context: ./bot
//!     depends_on: [api]
//! ```
//!
//! `services` はマップ（compose形式）と `name` を持つリストの両方を受け付けます。

use crate::error::{FlowError, Result};
use crate::model::{EnvBinding, Port, Protocol, ServiceSpec, Topology};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawTopology {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    registry: Option<String>,
    #[serde(default)]
    require: Vec<String>,
    #[serde(default)]
    variables: HashMap<String, Value>,
    #[serde(default)]
    services: Option<RawServices>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawServices {
    List(Vec<RawService>),
    Map(Mapping),
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default, alias = "environment")]
    env: Option<RawEnv>,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    depends_on: Option<RawDependsOn>,
    /// 未対応のキー（restart, healthcheck など）
    #[serde(flatten)]
    extra: Mapping,
}

impl RawService {
    fn ignored_keys(&self) -> Vec<String> {
        self.extra
            .keys()
            .map(|key| match key.as_str() {
                Some(name) => name.to_string(),
                None => format!("{:?}", key),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Context(String),
    Detailed {
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        dockerfile: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        args: Mapping,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnv {
    Map(Mapping),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Spec(String),
    Detailed {
        #[serde(default)]
        host: Option<u16>,
        container: u16,
        #[serde(default)]
        protocol: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependsOn {
    List(Vec<String>),
    // compose の depends_on: { db: { condition: ... } } 形式
    Map(Mapping),
}

/// YAML文字列をパース
pub fn parse_yaml_string(content: &str, default_name: String) -> Result<Topology> {
    let raw: RawTopology = serde_yaml::from_str(content)?;

    let mut topology = Topology {
        project: raw.project.unwrap_or(default_name),
        registry: raw.registry,
        ..Default::default()
    };

    for name in raw.require {
        if !topology.required.contains(&name) {
            topology.required.push(name);
        }
    }

    for (key, value) in raw.variables {
        let value = scalar_to_string(&value)
            .ok_or_else(|| FlowError::InvalidConfig(format!("変数 {} の値が不正です", key)))?;
        topology.variables.insert(key, value);
    }

    match raw.services {
        Some(RawServices::List(list)) => {
            for raw_service in list {
                let name = raw_service.name.clone().ok_or_else(|| {
                    FlowError::InvalidConfig("services の各要素には name が必要です".to_string())
                })?;
                topology.services.push(convert_service(name, raw_service)?);
            }
        }
        Some(RawServices::Map(map)) => {
            for (key, body) in map {
                let name = key
                    .as_str()
                    .ok_or_else(|| {
                        FlowError::InvalidConfig("サービス名は文字列で指定してください".to_string())
                    })?
                    .to_string();
                let raw_service: RawService = if body.is_null() {
                    RawService::default()
                } else {
                    serde_yaml::from_value(body)?
                };
                topology.services.push(convert_service(name, raw_service)?);
            }
        }
        None => {}
    }

    Ok(topology)
}

fn convert_service(name: String, raw: RawService) -> Result<ServiceSpec> {
    let mut service = ServiceSpec::new(name);
    let ignored = raw.ignored_keys();
    if !ignored.is_empty() {
        debug!(service = %service.name, keys = ?ignored, "Ignoring unsupported service keys");
    }
    service.image = raw.image;

    match raw.build {
        Some(RawBuild::Context(context)) => {
            service.build.context = PathBuf::from(context);
        }
        Some(RawBuild::Detailed {
            context,
            dockerfile,
            target,
            args,
        }) => {
            if let Some(context) = context {
                service.build.context = PathBuf::from(context);
            }
            service.build.dockerfile = dockerfile.map(PathBuf::from);
            service.build.target = target;
            for (key, value) in args {
                let (key, value) = mapping_entry(&service.name, "build.args", key, value)?;
                service.build.args.insert(key, value);
            }
        }
        None => {}
    }

    match raw.env {
        Some(RawEnv::Map(map)) => {
            for (key, value) in map {
                let key_name = key.as_str().map(|s| s.to_string());
                if value.is_null() {
                    // compose と同様、値なしは同名の環境変数を参照する
                    if let Some(key_name) = key_name {
                        let reference = format!("${{{}}}", key_name);
                        service.env.push(EnvBinding::new(key_name, &reference));
                        continue;
                    }
                }
                let (key, value) = mapping_entry(&service.name, "env", key, value)?;
                service.env.push(EnvBinding::new(key, &value));
            }
        }
        Some(RawEnv::List(entries)) => {
            for entry in entries {
                match entry.split_once('=') {
                    Some((key, value)) => service.env.push(EnvBinding::new(key.trim(), value)),
                    None => {
                        let key = entry.trim();
                        service
                            .env
                            .push(EnvBinding::new(key, &format!("${{{}}}", key)));
                    }
                }
            }
        }
        None => {}
    }

    for raw_port in raw.ports {
        let port = match raw_port {
            RawPort::Number(port) => Some(Port::same(port)),
            RawPort::Spec(spec) => Port::parse(&spec),
            RawPort::Detailed {
                host,
                container,
                protocol,
            } => match protocol.as_deref().map(Protocol::parse) {
                Some(None) => None,
                parsed => Some(Port {
                    host: host.unwrap_or(container),
                    container,
                    protocol: parsed.flatten().unwrap_or_default(),
                }),
            },
        };
        let port = port.filter(|p| p.host != 0 && p.container != 0).ok_or_else(|| {
            FlowError::InvalidConfig(format!("サービス '{}' のポート指定が不正です", service.name))
        })?;
        service.ports.push(port);
    }

    match raw.depends_on {
        Some(RawDependsOn::List(list)) => {
            for dependency in list {
                service.add_dependency(dependency);
            }
        }
        Some(RawDependsOn::Map(map)) => {
            for key in map.keys() {
                let dependency = key.as_str().ok_or_else(|| {
                    FlowError::InvalidConfig(format!(
                        "サービス '{}' の depends_on が不正です",
                        service.name
                    ))
                })?;
                service.add_dependency(dependency);
            }
        }
        None => {}
    }

    Ok(service)
}

fn mapping_entry(service: &str, field: &str, key: Value, value: Value) -> Result<(String, String)> {
    let key = key
        .as_str()
        .ok_or_else(|| {
            FlowError::InvalidConfig(format!("サービス '{}' の {} のキーが不正です", service, field))
        })?
        .to_string();
    let value = scalar_to_string(&value).ok_or_else(|| {
        FlowError::InvalidConfig(format!(
            "サービス '{}' の {}.{} の値が不正です",
            service, field, key
        ))
    })?;
    Ok((key, value))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_service_keys_are_collected() {
        let raw: RawService = serde_yaml::from_str(
            r#"
image: postgres:16
restart: always
healthcheck:
  test: ["CMD", "pg_isready"]
environment:
  POSTGRES_DB: shop
"#,
        )
        .unwrap();

        assert_eq!(raw.ignored_keys(), vec!["restart", "healthcheck"]);
        assert!(raw.env.is_some());
    }

    #[test]
    fn test_unsupported_service_keys_do_not_fail_parse() {
        let yaml = r#"
services:
  db:
    image: postgres:16
    restart: always
    volumes: ["data:/var/lib/postgresql/data"]
"#;

        let topology = parse_yaml_string(yaml, "shop".to_string()).unwrap();
        let db = topology.service("db").unwrap();
        assert_eq!(db.image.as_deref(), Some("postgres:16"));
    }
}
