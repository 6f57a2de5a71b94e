// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エラー型
pub mod error;

// 外部環境とのインターフェース（trait）定義
pub mod traits;

// 各コンポーネントの実装
pub mod pathfinding;
pub mod exploration;
pub mod stuck_detector;
pub mod obstacle;
pub mod actuation;
pub mod navigator;

// 便利な re-export
pub use common::*;
pub use error::{NavError, NavResult};
pub use traits::*;
pub use pathfinding::{CacheStats, PathfindingConfig, PathfindingEngine};
pub use exploration::{ExplorationConfig, ExplorationPlanner, FrontierStrategy};
pub use stuck_detector::{MotionStatus, StuckAction, StuckConfig, StuckDetector, StuckReport};
pub use obstacle::{ObstacleCategory, ObstacleConfig, ObstacleInteraction, ObstacleInteractionTracker};
pub use actuation::{ActuationConfig, ActuationRequest, ActuationScheduler};
pub use navigator::{CancelHandle, FinishReason, NavCommand, Navigator, NavigatorConfig, NavigatorStats};
