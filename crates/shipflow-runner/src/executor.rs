//! Step executor
//!
//! バッチは順番に、バッチ内のサービスは独立したタスクで並行に実行します。
//! 各サービスは build → tag → push → deploy の順に進み、失敗したステップ以降は
//! 実行しません。依存先がデプロイされなかったサービスは skipped になります。

use crate::report::{
    RollbackOutcome, RunReport, RunStatus, ServiceOutcome, ServiceStatus, StepResult, StepStatus,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use shipflow_core::{DeploymentPlan, ResolvedService};
use shipflow_provider::{DeployProvider, ImageId, RetryConfig, Step, StepError};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 一部のサービスが失敗したときの扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// デプロイ済みのサービスはそのまま残す
    #[default]
    RollForward,
    /// デプロイ済みのサービスを完了の逆順にロールバックする
    RollBack,
}

impl FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roll-forward" | "forward" => Ok(Self::RollForward),
            "roll-back" | "rollback" | "back" => Ok(Self::RollBack),
            other => Err(format!(
                "unknown rollback policy '{}' (expected roll-forward or roll-back)",
                other
            )),
        }
    }
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackPolicy::RollForward => f.write_str("roll-forward"),
            RollbackPolicy::RollBack => f.write_str("roll-back"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub retry: RetryConfig,
    /// バッチ内で同時に実行するサービス数の上限（None は無制限）
    pub max_parallel: Option<usize>,
    pub rollback: RollbackPolicy,
}

type StepLog = Arc<Mutex<Vec<StepResult>>>;

pub struct Executor {
    provider: Arc<dyn DeployProvider>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(provider: Arc<dyn DeployProvider>, options: ExecutorOptions) -> Self {
        Self { provider, options }
    }

    /// 実行計画を実行してレポートを返す
    ///
    /// ステップの失敗はサービス単位で記録され、呼び出し側にエラーとして返ることはありません。
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        services: &[ResolvedService],
        cancel: CancellationToken,
    ) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();

        let by_name: HashMap<&str, &ResolvedService> =
            services.iter().map(|s| (s.name.as_str(), s)).collect();
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let semaphore = self
            .options
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let mut outcomes: HashMap<String, ServiceOutcome> = HashMap::new();

        info!(
            provider = self.provider.name(),
            batches = plan.len(),
            services = plan.service_count(),
            "Starting deployment run"
        );

        for (index, batch) in plan.batches().iter().enumerate() {
            debug!(batch = index, services = ?batch, "Starting batch");
            let mut handles = Vec::new();

            for name in batch {
                let Some(service) = by_name.get(name.as_str()).copied() else {
                    warn!(service = %name, "Service in plan has no resolved definition");
                    outcomes.insert(
                        name.clone(),
                        ServiceOutcome::new(name.as_str(), "", ServiceStatus::Failed)
                            .with_reason("no resolved definition for this service"),
                    );
                    continue;
                };

                let blocked_by = service.depends_on.iter().find(|dep| {
                    outcomes.get(dep.as_str()).map(|o| o.status) != Some(ServiceStatus::Deployed)
                });
                if let Some(dependency) = blocked_by {
                    info!(service = %service.name, %dependency, "Skipping service");
                    record_skipped(&log, &service.name, &Step::PIPELINE).await;
                    outcomes.insert(
                        name.clone(),
                        ServiceOutcome::new(name.as_str(), service.image.as_str(), ServiceStatus::Skipped)
                            .with_reason(format!("dependency '{}' was not deployed", dependency)),
                    );
                    continue;
                }

                if cancel.is_cancelled() {
                    outcomes.insert(
                        name.clone(),
                        cancelled_outcome(service, "run was cancelled before the service started"),
                    );
                    continue;
                }

                let run = ServiceRun {
                    provider: Arc::clone(&self.provider),
                    service: service.clone(),
                    retry: self.options.retry.clone(),
                    log: Arc::clone(&log),
                    cancel: cancel.clone(),
                };
                let semaphore = semaphore.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => {
                            tokio::select! {
                                _ = run.cancel.cancelled() => {
                                    return cancelled_outcome(
                                        &run.service,
                                        "run was cancelled before the service started",
                                    );
                                }
                                permit = semaphore.acquire_owned() => permit.ok(),
                            }
                        }
                        None => None,
                    };
                    run.execute().await
                });
                handles.push((name.clone(), service.image.clone(), handle));
            }

            let (meta, handles): (Vec<_>, Vec<_>) = handles
                .into_iter()
                .map(|(name, image, handle)| ((name, image), handle))
                .unzip();

            for ((name, image), joined) in meta.into_iter().zip(join_all(handles).await) {
                let outcome = joined.unwrap_or_else(|e| {
                    warn!(service = %name, error = %e, "Service task aborted");
                    ServiceOutcome::new(name.as_str(), image, ServiceStatus::Failed)
                        .with_reason(format!("service task aborted: {}", e))
                });
                outcomes.insert(name, outcome);
            }
        }

        let services_in_order: Vec<ServiceOutcome> = plan
            .services()
            .filter_map(|name| outcomes.remove(name))
            .collect();

        let status = if services_in_order
            .iter()
            .all(|o| o.status == ServiceStatus::Deployed)
        {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let cancelled = cancel.is_cancelled()
            && services_in_order
                .iter()
                .any(|o| o.status == ServiceStatus::Cancelled);

        let rollbacks = if status == RunStatus::Partial
            && self.options.rollback == RollbackPolicy::RollBack
        {
            if cancel.is_cancelled() {
                warn!("Run was cancelled, not rolling back deployed services");
                Vec::new()
            } else {
                self.roll_back(&services_in_order, &by_name, &log).await
            }
        } else {
            Vec::new()
        };

        let steps = std::mem::take(&mut *log.lock().await);
        let finished_at = Utc::now();

        info!(
            ?status,
            cancelled,
            duration_ms = clock.elapsed().as_millis() as u64,
            "Deployment run finished"
        );

        RunReport {
            status,
            cancelled,
            services: services_in_order,
            steps,
            rollbacks,
            started_at,
            finished_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    /// デプロイ済みのサービスを完了の逆順にロールバック
    async fn roll_back(
        &self,
        outcomes: &[ServiceOutcome],
        by_name: &HashMap<&str, &ResolvedService>,
        log: &StepLog,
    ) -> Vec<RollbackOutcome> {
        let mut deployed: Vec<&ServiceOutcome> = outcomes
            .iter()
            .filter(|o| o.status == ServiceStatus::Deployed)
            .collect();
        deployed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));

        let mut results = Vec::new();
        for outcome in deployed {
            let Some(service) = by_name.get(outcome.name.as_str()).copied() else {
                continue;
            };
            info!(service = %service.name, "Rolling back");

            let mut attempts = 0;
            let result = run_step(
                &self.options.retry,
                &CancellationToken::new(),
                log,
                &service.name,
                Step::Rollback,
                &mut attempts,
                || self.provider.rollback(service),
            )
            .await;

            results.push(match result {
                Ok(()) => RollbackOutcome {
                    service: service.name.clone(),
                    success: true,
                    message: None,
                },
                Err(failure) => {
                    let err = failure.into_error();
                    warn!(service = %service.name, error = %err, "Rollback failed");
                    RollbackOutcome {
                        service: service.name.clone(),
                        success: false,
                        message: Some(err.to_string()),
                    }
                }
            });
        }
        results
    }
}

/// 1サービス分のパイプライン
struct ServiceRun {
    provider: Arc<dyn DeployProvider>,
    service: ResolvedService,
    retry: RetryConfig,
    log: StepLog,
    cancel: CancellationToken,
}

impl ServiceRun {
    async fn execute(self) -> ServiceOutcome {
        let name = self.service.name.as_str();
        let mut outcome = ServiceOutcome::new(name, self.service.image.as_str(), ServiceStatus::Deployed);
        let mut image: Option<ImageId> = None;

        for (index, step) in Step::PIPELINE.iter().copied().enumerate() {
            // 実行中のステップは完了させ、新しいステップは開始しない
            if self.cancel.is_cancelled() {
                record_skipped(&self.log, name, &Step::PIPELINE[index..]).await;
                return finish(
                    outcome,
                    ServiceStatus::Cancelled,
                    Some("run was cancelled".to_string()),
                );
            }

            let result = match step {
                Step::Build => self
                    .step(step, &mut outcome.attempts, || self.provider.build(&self.service))
                    .await
                    .map(|id| image = Some(id)),
                Step::Tag => {
                    let built = image.clone().unwrap_or_else(|| ImageId::new(self.service.image.as_str()));
                    self.step(step, &mut outcome.attempts, || {
                        self.provider.tag(&built, &self.service.image)
                    })
                    .await
                }
                Step::Push => {
                    self.step(step, &mut outcome.attempts, || {
                        self.provider.push(&self.service.image)
                    })
                    .await
                }
                Step::Deploy => {
                    self.step(step, &mut outcome.attempts, || self.provider.deploy(&self.service))
                        .await
                }
                Step::Rollback => Ok(()),
            };

            if let Err(failure) = result {
                record_skipped(&self.log, name, &Step::PIPELINE[index + 1..]).await;
                let status = match failure {
                    StepFailure::Cancelled(_) => ServiceStatus::Cancelled,
                    StepFailure::Failed(_) => ServiceStatus::Failed,
                };
                let err = failure.into_error();
                warn!(service = name, %step, error = %err, "Service failed");
                outcome.failed_step = Some(step);
                outcome.output = Some(if err.output.is_empty() {
                    err.message.clone()
                } else {
                    err.output.clone()
                });
                return finish(outcome, status, Some(err.to_string()));
            }
        }

        info!(service = name, image = %self.service.image, "Service deployed");
        finish(outcome, ServiceStatus::Deployed, None)
    }

    async fn step<T, F, Fut>(&self, step: Step, attempts: &mut u32, op: F) -> Result<T, StepFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = shipflow_provider::Result<T>>,
    {
        run_step(
            &self.retry,
            &self.cancel,
            &self.log,
            &self.service.name,
            step,
            attempts,
            op,
        )
        .await
    }
}

/// 失敗したステップの扱い
enum StepFailure {
    Failed(StepError),
    /// リトライ待ちの間にキャンセルされた
    Cancelled(StepError),
}

impl StepFailure {
    fn into_error(self) -> StepError {
        match self {
            StepFailure::Failed(err) | StepFailure::Cancelled(err) => err,
        }
    }
}

/// 1ステップをリトライ付きで実行
///
/// 一時的なエラーのみ、`max_attempts` まで指数バックオフで再試行します。
async fn run_step<T, F, Fut>(
    retry: &RetryConfig,
    cancel: &CancellationToken,
    log: &StepLog,
    service: &str,
    step: Step,
    attempts: &mut u32,
    mut op: F,
) -> Result<T, StepFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = shipflow_provider::Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        *attempts += 1;
        debug!(service, %step, attempt, "Running step");

        match op().await {
            Ok(value) => {
                record(log, service, step, StepStatus::Success, attempt, None).await;
                return Ok(value);
            }
            Err(err) => {
                record(log, service, step, StepStatus::Failure, attempt, Some(&err)).await;

                if !err.is_transient() || !retry.allows_retry(attempt) {
                    return Err(StepFailure::Failed(err));
                }

                let delay = retry.delay_for_attempt(attempt - 1);
                warn!(
                    service,
                    %step,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(StepFailure::Cancelled(err)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn record(
    log: &StepLog,
    service: &str,
    step: Step,
    status: StepStatus,
    attempt: u32,
    error: Option<&StepError>,
) {
    log.lock().await.push(StepResult {
        service: service.to_string(),
        step,
        status,
        attempt,
        output: error.map(|e| e.output.clone()).unwrap_or_default(),
        message: error.map(|e| e.message.clone()),
        timestamp: Utc::now(),
    });
}

async fn record_skipped(log: &StepLog, service: &str, steps: &[Step]) {
    let mut log = log.lock().await;
    for step in steps {
        log.push(StepResult {
            service: service.to_string(),
            step: *step,
            status: StepStatus::Skipped,
            attempt: 0,
            output: String::new(),
            message: None,
            timestamp: Utc::now(),
        });
    }
}

fn cancelled_outcome(service: &ResolvedService, reason: &str) -> ServiceOutcome {
    let mut outcome =
        ServiceOutcome::new(service.name.as_str(), service.image.as_str(), ServiceStatus::Cancelled)
            .with_reason(reason);
    outcome.finished_at = Some(Utc::now());
    outcome
}

fn finish(mut outcome: ServiceOutcome, status: ServiceStatus, reason: Option<String>) -> ServiceOutcome {
    outcome.status = status;
    outcome.reason = reason;
    outcome.finished_at = Some(Utc::now());
    outcome
}
