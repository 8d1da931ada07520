//! 変数解決
//!
//! ロード済みのトポロジーと変数セットから、プロバイダーに渡せる具体的な値を生成します。
//! 元の [`ServiceSpec`] は変更しません。

use crate::error::{FlowError, Result};
use crate::image::validate_reference;
use crate::model::{Port, ServiceSpec, Topology};
use crate::template::{Variables, check_required, render, render_env_value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SENSITIVE_ARG_PATTERNS: &[&str] = &["password", "token", "secret", "api_key", "private_key"];

/// 解決済みのビルド設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBuild {
    /// トポロジーのルートからの絶対または相対パス
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub target: Option<String>,
    pub args: BTreeMap<String, String>,
}

/// 解決済みのサービス
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedService {
    pub name: String,
    /// 検証済みのイメージ参照
    pub image: String,
    pub build: ResolvedBuild,
    /// 宣言順の環境変数
    pub env: Vec<(String, String)>,
    pub ports: Vec<Port>,
    pub depends_on: Vec<String>,
}

impl ResolvedService {
    pub fn exposed_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.container)
    }
}

/// トポロジー全体を解決
///
/// プロバイダーを呼び出す前に、必須変数の存在・イメージ参照・ビルドコンテキストを
/// まとめて検証します。
pub fn resolve_topology(
    topology: &Topology,
    vars: &Variables,
    extra_required: &[String],
) -> Result<Vec<ResolvedService>> {
    check_required(topology, vars, extra_required)?;

    let mut vars = vars.clone();
    let registry = match &topology.registry {
        Some(template) => {
            let registry = render(template, &vars)?.trim_end_matches('/').to_string();
            if !vars.contains("REGISTRY") {
                vars.insert("REGISTRY", registry.clone());
            }
            Some(registry)
        }
        None => None,
    };

    topology
        .services
        .iter()
        .map(|service| resolve_service(topology, service, registry.as_deref(), &vars))
        .collect()
}

fn resolve_service(
    topology: &Topology,
    service: &ServiceSpec,
    registry: Option<&str>,
    vars: &Variables,
) -> Result<ResolvedService> {
    let image = match &service.image {
        Some(template) => render(template, vars)?,
        None => default_image(&topology.project, &service.name, registry),
    };
    validate_reference(&image).map_err(|reason| FlowError::InvalidImage {
        service: service.name.clone(),
        reason,
    })?;

    let context = resolve_context(&topology.root, &service.build.context);
    if !context.is_dir() {
        return Err(FlowError::ContextNotFound {
            service: service.name.clone(),
            path: context,
        });
    }

    let mut args = BTreeMap::new();
    for (key, value) in &service.build.args {
        warn_sensitive_arg(&service.name, key);
        args.insert(key.clone(), render(value, vars)?);
    }

    let env = service
        .env
        .iter()
        .map(|binding| Ok((binding.name.clone(), render_env_value(&binding.value, vars)?)))
        .collect::<Result<Vec<_>>>()?;

    debug!(service = %service.name, %image, context = %context.display(), "Resolved service");

    Ok(ResolvedService {
        name: service.name.clone(),
        image,
        build: ResolvedBuild {
            dockerfile: service.build.dockerfile.as_ref().map(|d| context.join(d)),
            context,
            target: service.build.target.clone(),
            args,
        },
        env,
        ports: service.ports.clone(),
        depends_on: service.depends_on.clone(),
    })
}

/// イメージ未指定時の参照
///
/// - registry あり: `{registry}/{service}:latest`
/// - registry なし: `{project}-{service}:latest`
fn default_image(project: &str, service: &str, registry: Option<&str>) -> String {
    match registry {
        Some(registry) => format!("{}/{}:latest", registry, service.to_lowercase()),
        None => format!(
            "{}-{}:latest",
            project.to_lowercase(),
            service.to_lowercase()
        ),
    }
}

fn resolve_context(root: &Path, context: &Path) -> PathBuf {
    if context.is_absolute() || root.as_os_str().is_empty() {
        context.to_path_buf()
    } else {
        root.join(context)
    }
}

/// ビルド引数の検証（機密情報の警告）
fn warn_sensitive_arg(service: &str, key: &str) {
    let key_lower = key.to_lowercase();
    if SENSITIVE_ARG_PATTERNS.iter().any(|p| key_lower.contains(p)) {
        warn!(
            service,
            "警告: ビルド引数 '{}' は機密情報を含む可能性があります。\n\
             ビルド引数はイメージ履歴に記録されます。\n\
             機密情報はビルド引数ではなく、環境変数を使用してください。",
            key
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::EnvBinding;
    use std::fs;
    use tempfile::tempdir;

    fn topology_at(root: &Path, services: Vec<ServiceSpec>) -> Topology {
        Topology {
            project: "shop".into(),
            services,
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_image_without_registry() {
        let temp_dir = tempdir().unwrap();
        let topology = topology_at(temp_dir.path(), vec![ServiceSpec::new("api")]);

        let resolved = resolve_topology(&topology, &Variables::new(), &[]).unwrap();
        assert_eq!(resolved[0].image, "shop-api:latest");
        assert_eq!(resolved[0].build.context, temp_dir.path().join("."));
    }

    #[test]
    fn test_registry_prefix_and_placeholder() {
        let temp_dir = tempdir().unwrap();
        let mut bot = ServiceSpec::new("bot");
        bot.image = Some("${REGISTRY}/telegram-bot:${TAG:-v1}".into());
        let mut topology = topology_at(temp_dir.path(), vec![ServiceSpec::new("api"), bot]);
        topology.registry = Some("${REGION}-docker.pkg.dev/${PROJECT_ID}/assistant/".into());

        let mut vars = Variables::new();
        vars.insert("REGION", "asia-northeast1");
        vars.insert("PROJECT_ID", "shop-prod");

        let resolved = resolve_topology(&topology, &vars, &[]).unwrap();
        assert_eq!(
            resolved[0].image,
            "asia-northeast1-docker.pkg.dev/shop-prod/assistant/api:latest"
        );
        assert_eq!(
            resolved[1].image,
            "asia-northeast1-docker.pkg.dev/shop-prod/assistant/telegram-bot:v1"
        );
    }

    #[test]
    fn test_env_is_rendered_in_declaration_order() {
        let temp_dir = tempdir().unwrap();
        let mut api = ServiceSpec::new("api");
        api.env.push(EnvBinding::new("MODE", "webhook"));
        api.env.push(EnvBinding::new("KEY", "${GEMINI_API_KEY}"));
        api.env.push(EnvBinding::new("PRICE", "$$5"));
        let topology = topology_at(temp_dir.path(), vec![api]);

        let mut vars = Variables::new();
        vars.insert("GEMINI_API_KEY", "secret");

        let resolved = resolve_topology(&topology, &vars, &[]).unwrap();
        assert_eq!(
            resolved[0].env,
            vec![
                ("MODE".to_string(), "webhook".to_string()),
                ("KEY".to_string(), "secret".to_string()),
                ("PRICE".to_string(), "$5".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_variable_fails_before_anything_else() {
        let temp_dir = tempdir().unwrap();
        let mut api = ServiceSpec::new("api");
        api.env.push(EnvBinding::new("KEY", "${GEMINI_API_KEY}"));
        let topology = topology_at(temp_dir.path(), vec![api]);

        let err = resolve_topology(&topology, &Variables::new(), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(matches!(err, FlowError::MissingVariables(ref names) if names == &["GEMINI_API_KEY"]));
    }

    #[test]
    fn test_extra_required_variable() {
        let temp_dir = tempdir().unwrap();
        let topology = topology_at(temp_dir.path(), vec![ServiceSpec::new("api")]);

        let err = resolve_topology(&topology, &Variables::new(), &["DEPLOY_TOKEN".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("DEPLOY_TOKEN"));
    }

    #[test]
    fn test_invalid_image_reference() {
        let temp_dir = tempdir().unwrap();
        let mut api = ServiceSpec::new("api");
        api.image = Some("api:${TAG}".into());
        let topology = topology_at(temp_dir.path(), vec![api]);

        let mut vars = Variables::new();
        vars.insert("TAG", "-broken");

        let err = resolve_topology(&topology, &vars, &[]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidImage { ref service, .. } if service == "api"));
    }

    #[test]
    fn test_missing_build_context() {
        let temp_dir = tempdir().unwrap();
        let mut api = ServiceSpec::new("api");
        api.build.context = PathBuf::from("./services/api");
        let topology = topology_at(temp_dir.path(), vec![api]);

        let err = resolve_topology(&topology, &Variables::new(), &[]).unwrap_err();
        assert!(matches!(err, FlowError::ContextNotFound { .. }));
    }

    #[test]
    fn test_build_paths_and_args() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("bot")).unwrap();

        let mut bot = ServiceSpec::new("bot");
        bot.build.context = PathBuf::from("bot");
        bot.build.dockerfile = Some(PathBuf::from("Dockerfile.prod"));
        bot.build
            .args
            .insert("COMMIT".into(), "${GIT_SHA:-dev}".into());
        let topology = topology_at(temp_dir.path(), vec![bot]);

        let resolved = resolve_topology(&topology, &Variables::new(), &[]).unwrap();
        let build = &resolved[0].build;
        assert_eq!(build.context, temp_dir.path().join("bot"));
        assert_eq!(
            build.dockerfile,
            Some(temp_dir.path().join("bot").join("Dockerfile.prod"))
        );
        assert_eq!(build.args["COMMIT"], "dev");
    }
}
