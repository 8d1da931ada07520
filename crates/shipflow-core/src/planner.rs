//! 実行計画
//!
//! `depends_on` をもとに Kahn のアルゴリズムでサービスをバッチに分割します。
//! 同じバッチ内は宣言順で並び、同じ入力からは常に同じ計画が得られます。

use crate::error::{FlowError, Result};
use crate::model::{ServiceSpec, Topology};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// バッチ化された実行計画
///
/// 各サービスはちょうど1つのバッチに属し、依存先はすべて前のバッチに含まれます。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    batches: Vec<Vec<String>>,
}

impl DeploymentPlan {
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// バッチ数
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// 計画に含まれるサービス数
    pub fn service_count(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    /// サービスが属するバッチのインデックス
    pub fn batch_of(&self, service: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|name| name == service))
    }

    /// 計画順のサービス名
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.batches.iter().flatten().map(|s| s.as_str())
    }
}

/// トポロジーから実行計画を作成
pub fn plan(topology: &Topology) -> Result<DeploymentPlan> {
    plan_services(&topology.services)
}

/// サービス一覧から実行計画を作成
///
/// 循環が残った場合は、循環に含まれるサービスのみを宣言順で
/// `CircularDependency` として返します。循環の下流にあるだけのサービスは含みません。
pub fn plan_services(services: &[ServiceSpec]) -> Result<DeploymentPlan> {
    let index: HashMap<&str, usize> = services
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; services.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];

    for (i, service) in services.iter().enumerate() {
        for dependency in &service.depends_on {
            let &dep = index
                .get(dependency.as_str())
                .ok_or_else(|| FlowError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dependency.clone(),
                })?;
            indegree[i] += 1;
            dependents[dep].push(i);
        }
    }

    let mut placed = vec![false; services.len()];
    let mut batches: Vec<Vec<String>> = Vec::new();

    loop {
        // 宣言順に走査するのでバッチ内の順序は安定する
        let ready: Vec<usize> = (0..services.len())
            .filter(|&i| !placed[i] && indegree[i] == 0)
            .collect();
        if ready.is_empty() {
            break;
        }

        for &i in &ready {
            placed[i] = true;
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
            }
        }

        debug!(batch = batches.len(), size = ready.len(), "Planned batch");
        batches.push(ready.iter().map(|&i| services[i].name.clone()).collect());
    }

    if placed.iter().all(|&p| p) {
        return Ok(DeploymentPlan { batches });
    }

    Err(FlowError::CircularDependency(cycle_members(
        services, &dependents, &placed,
    )))
}

/// 未配置のノードから、未配置の依存元を持たないノードを繰り返し除去する
///
/// 残ったノードは循環上にあるか、2つの循環をつなぐ経路上にあります。
fn cycle_members(services: &[ServiceSpec], dependents: &[Vec<usize>], placed: &[bool]) -> Vec<String> {
    let mut remaining: Vec<bool> = placed.iter().map(|&p| !p).collect();

    loop {
        let prunable: Vec<usize> = (0..services.len())
            .filter(|&i| remaining[i] && !dependents[i].iter().any(|&d| remaining[d]))
            .collect();
        if prunable.is_empty() {
            break;
        }
        for i in prunable {
            remaining[i] = false;
        }
    }

    services
        .iter()
        .zip(remaining)
        .filter(|(_, keep)| *keep)
        .map(|(s, _)| s.name.clone())
        .collect()
}
