//! Command-line provider
//!
//! Drives a container engine CLI (`docker`, `podman`) for build/tag/push and a
//! managed-compute CLI (`gcloud run`) for deploy and rollback.

use crate::error::{FailureKind, Result, Step, StepError, classify_failure};
use crate::provider::{DeployProvider, ImageId};
use async_trait::async_trait;
use regex::Regex;
use shipflow_core::ResolvedService;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{LazyLock, Mutex};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Delimiters tried for `--set-env-vars` when a value contains a comma
const ENV_DELIMITERS: [char; 6] = ['@', '#', '|', ';', '~', '%'];

/// `services describe` output meaning the service does not exist yet
static NOT_FOUND_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bNOT_FOUND\b|could not be found|cannot find service|\b404\b")
        .expect("not-found pattern is valid")
});

/// What was serving before this run first deployed a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorRevision {
    /// The service did not exist; rollback deletes it
    New,
    /// Rollback routes all traffic back to this revision
    Serving(String),
    /// `describe` failed for another reason; rollback refuses to act
    Unknown(String),
}

/// Command provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Container engine binary
    pub engine: String,
    /// Deployment CLI binary
    pub deployer: String,
    /// Prefix for the local build tag (`<project>-<service>:build`)
    pub project_name: String,
    pub region: String,
    /// Cloud project passed as `--project`
    pub cloud_project: Option<String>,
    /// Target platform for builds (e.g. `linux/amd64`)
    pub platform: Option<String>,
    /// Record commands without running them
    pub dry_run: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            deployer: "gcloud".to_string(),
            project_name: "shipflow".to_string(),
            region: "us-central1".to_string(),
            cloud_project: None,
            platform: None,
            dry_run: false,
        }
    }
}

/// Provider that shells out to external CLIs
pub struct CommandProvider {
    config: CommandConfig,
    /// Recorded once per service, before its first deploy attempt
    previous_revisions: Mutex<HashMap<String, PriorRevision>>,
    issued: Mutex<Vec<String>>,
}

impl CommandProvider {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            config,
            previous_revisions: Mutex::new(HashMap::new()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Every command line issued so far, in issue order
    pub fn issued_commands(&self) -> Vec<String> {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Local tag given to the freshly built image
    pub fn local_tag(&self, service: &str) -> String {
        format!(
            "{}-{}:build",
            self.config.project_name.to_lowercase(),
            service.to_lowercase()
        )
    }

    pub fn build_args(&self, service: &ResolvedService) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "-q".to_string(),
            "-t".to_string(),
            self.local_tag(&service.name),
        ];

        if let Some(dockerfile) = &service.build.dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.display().to_string());
        }
        if let Some(target) = &service.build.target {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        for (key, value) in &service.build.args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(platform) = &self.config.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }

        args.push(service.build.context.display().to_string());
        args
    }

    pub fn deploy_args(&self, service: &ResolvedService) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "deploy".to_string(),
            service.name.clone(),
            "--image".to_string(),
            service.image.clone(),
        ];
        args.extend(self.location_args());

        if let Some(port) = service.exposed_port() {
            args.push("--port".to_string());
            args.push(port.to_string());
        }
        if let Some(env) = env_vars_arg(&service.env) {
            args.push(env);
        }

        args.push("--quiet".to_string());
        args
    }

    pub fn describe_args(&self, service: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "services".to_string(),
            "describe".to_string(),
            service.to_string(),
        ];
        args.extend(self.location_args());
        args.push("--format".to_string());
        args.push("value(status.latestReadyRevisionName)".to_string());
        args
    }

    pub fn update_traffic_args(&self, service: &str, revision: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "services".to_string(),
            "update-traffic".to_string(),
            service.to_string(),
            "--to-revisions".to_string(),
            format!("{}=100", revision),
        ];
        args.extend(self.location_args());
        args.push("--quiet".to_string());
        args
    }

    pub fn delete_args(&self, service: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "services".to_string(),
            "delete".to_string(),
            service.to_string(),
        ];
        args.extend(self.location_args());
        args.push("--quiet".to_string());
        args
    }

    fn location_args(&self) -> Vec<String> {
        let mut args = vec!["--region".to_string(), self.config.region.clone()];
        if let Some(project) = &self.config.cloud_project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        args
    }

    /// Run a command and return its trimmed stdout
    async fn run_command(&self, step: Step, program: &str, args: &[String]) -> Result<String> {
        let line = command_line(program, args);
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.clone());

        if self.config.dry_run {
            info!(%step, command = %line, "Dry run");
            return Ok(String::new());
        }

        debug!("Running: {}", line);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StepError::permanent(step, format!("failed to run `{}`: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = [stderr.as_str(), stdout.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("`{}` exited with {}", program, output.status));

        Err(StepError {
            step,
            kind: classify_failure(&diagnostic),
            message,
            output: diagnostic,
        })
    }

    /// Keeps the first recorded state; later deploy attempts never overwrite it
    /// Look up the revision serving before our first deploy
    ///
    /// Transient failures are returned so the deploy step is retried.
    async fn describe_serving(&self, service: &str) -> Result<PriorRevision> {
        let result = self
            .run_command(Step::Deploy, &self.config.deployer, &self.describe_args(service))
            .await;

        match result {
            Ok(revision) if !revision.is_empty() => Ok(PriorRevision::Serving(revision)),
            Ok(_) if self.config.dry_run => Ok(PriorRevision::New),
            Ok(_) => Ok(PriorRevision::Unknown(
                "no ready revision reported".to_string(),
            )),
            Err(err) if NOT_FOUND_PATTERNS.is_match(&err.output) => Ok(PriorRevision::New),
            Err(err) if err.kind == FailureKind::Transient => Err(err),
            Err(err) => {
                warn!(service, error = %err.message, "Could not read the serving revision");
                Ok(PriorRevision::Unknown(err.message))
            }
        }
    }

    fn remember_revision(&self, service: &str, revision: PriorRevision) {
        self.previous_revisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(service.to_string())
            .or_insert(revision);
    }

    pub fn previous_revision(&self, service: &str) -> Option<PriorRevision> {
        self.previous_revisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(service)
            .cloned()
    }
}

#[async_trait]
impl DeployProvider for CommandProvider {
    fn name(&self) -> &str {
        if self.config.dry_run {
            "dry-run"
        } else {
            "command"
        }
    }

    async fn build(&self, service: &ResolvedService) -> Result<ImageId> {
        let stdout = self
            .run_command(Step::Build, &self.config.engine, &self.build_args(service))
            .await?;

        // `build -q` prints the image id last; fall back to the local tag
        let id = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.local_tag(&service.name));
        Ok(ImageId::new(id))
    }

    async fn tag(&self, image: &ImageId, reference: &str) -> Result<()> {
        let args = vec![
            "tag".to_string(),
            image.to_string(),
            reference.to_string(),
        ];
        self.run_command(Step::Tag, &self.config.engine, &args)
            .await
            .map(|_| ())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        let args = vec!["push".to_string(), reference.to_string()];
        self.run_command(Step::Push, &self.config.engine, &args)
            .await
            .map(|_| ())
    }

    async fn deploy(&self, service: &ResolvedService) -> Result<()> {
        if self.previous_revision(&service.name).is_none() {
            let prior = self.describe_serving(&service.name).await?;
            debug!(service = %service.name, ?prior, "Recorded serving revision");
            self.remember_revision(&service.name, prior);
        }

        self.run_command(
            Step::Deploy,
            &self.config.deployer,
            &self.deploy_args(service),
        )
        .await
        .map(|_| ())
    }

    async fn rollback(&self, service: &ResolvedService) -> Result<()> {
        let args = match self.previous_revision(&service.name) {
            Some(PriorRevision::Serving(revision)) => {
                self.update_traffic_args(&service.name, &revision)
            }
            Some(PriorRevision::New) => self.delete_args(&service.name),
            Some(PriorRevision::Unknown(reason)) => {
                return Err(StepError::permanent(
                    Step::Rollback,
                    format!(
                        "previous state of '{}' is unknown ({}); not touching the service",
                        service.name, reason
                    ),
                ));
            }
            None => {
                debug!(service = %service.name, "Nothing deployed by this run, skipping rollback");
                return Ok(());
            }
        };
        self.run_command(Step::Rollback, &self.config.deployer, &args)
            .await
            .map(|_| ())
    }
}

/// Build the `--set-env-vars` flag
///
/// Falls back to gcloud's `^DELIM^` escaping when a value contains a comma.
pub fn env_vars_arg(env: &[(String, String)]) -> Option<String> {
    if env.is_empty() {
        return None;
    }

    let entries: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    if !entries.iter().any(|e| e.contains(',')) {
        return Some(format!("--set-env-vars={}", entries.join(",")));
    }

    let delimiter = ENV_DELIMITERS
        .into_iter()
        .find(|d| !entries.iter().any(|e| e.contains(*d)))
        .unwrap_or('@');
    Some(format!(
        "--set-env-vars=^{}^{}",
        delimiter,
        entries.join(&delimiter.to_string())
    ))
}

/// Shell-like rendering of a command for logs and dry runs
fn command_line(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    for arg in args {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("'{}'", arg.replace('\'', r"'\''")));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}
