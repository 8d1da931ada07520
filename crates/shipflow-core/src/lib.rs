//! ShipFlow Core
//!
//! デプロイトポロジーのモデル定義、KDL/YAMLパーサー、ローダー、
//! 変数展開、依存関係に基づく実行計画（バッチ化されたトポロジカルソート）を提供します。

pub mod error;
pub mod image;
pub mod loader;
pub mod model;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod template;

pub use error::{ErrorKind, FlowError, Result};
pub use image::{split_image_tag, validate_reference};
pub use loader::{TopologyFormat, load_topology, load_topology_str, validate_topology};
pub use model::*;
pub use planner::{DeploymentPlan, plan, plan_services};
pub use resolver::{ResolvedBuild, ResolvedService, resolve_topology};
pub use template::{Placeholder, Variables, references, render, required_variables};
