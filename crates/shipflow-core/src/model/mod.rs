//! モデル定義
//!
//! ShipFlowで使用されるデータモデルを定義します。
//! 各モデルは機能ごとにモジュールに分離されています。

mod port;
mod service;
mod topology;

// Re-exports
pub use port::*;
pub use service::*;
pub use topology::*;
