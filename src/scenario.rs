use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{EntityId, NavigatorConfig, Position2D};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    pub seed: u64,
}

/// 移動可能領域
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegionRect {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl RegionRect {
    pub fn contains(&self, position: &Position2D) -> bool {
        position.x >= self.xmin && position.x <= self.xmax && position.y >= self.ymin && position.y <= self.ymax
    }

    /// 領域内に収める
    pub fn clamp(&self, position: Position2D) -> Position2D {
        Position2D::new(
            position.x.max(self.xmin).min(self.xmax),
            position.y.max(self.ymin).min(self.ymax),
        )
    }
}

/// 配置エンティティ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityConfig {
    pub id: EntityId,
    pub label: String,
    pub position: Position2D,
}

/// 外部ルートサービスのシミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteServiceConfig {
    pub enabled: bool,
    /// 応答遅延（ミリ秒）
    pub delay_ms: u64,
    /// N 回に1回失敗させる（0 で失敗しない）
    pub fail_every: u32,
    /// クラスタ問い合わせで返す候補点
    pub cluster_points: Vec<Position2D>,
}

impl Default for RouteServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 0,
            fail_every: 0,
            cluster_points: Vec::new(),
        }
    }
}

/// 世界設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    pub start: Position2D,
    pub region_rect: RegionRect,
    /// 移動速度（単位/秒）
    pub speed: f64,
    /// ワールド → スクリーン座標の倍率
    #[serde(default = "default_projection_scale")]
    pub projection_scale: f64,
    /// N 回に1回位置取得を失敗させる（0 で失敗しない）
    #[serde(default)]
    pub position_dropout_every: u32,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// エリア遷移後の出現位置
    #[serde(default)]
    pub transition_destination: Option<Position2D>,
    #[serde(default)]
    pub route_service: RouteServiceConfig,
}

fn default_projection_scale() -> f64 {
    1.0
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub world: WorldConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列から読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if self.sim.dt_s <= 0.0 {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if self.sim.t_max_s <= 0.0 {
            return Err(ScenarioError::ValidationError("t_max_s must be positive".to_string()));
        }

        // 座標範囲の検証
        let region = &self.world.region_rect;
        if region.xmin >= region.xmax || region.ymin >= region.ymax {
            return Err(ScenarioError::ValidationError("Invalid region bounds".to_string()));
        }
        if !self.world.start.is_finite() || !region.contains(&self.world.start) {
            return Err(ScenarioError::ValidationError("Start position outside region bounds".to_string()));
        }
        if self.world.speed <= 0.0 {
            return Err(ScenarioError::ValidationError("speed must be positive".to_string()));
        }
        if self.world.projection_scale <= 0.0 {
            return Err(ScenarioError::ValidationError("projection_scale must be positive".to_string()));
        }

        // エンティティIDの重複検証
        let mut ids = HashSet::new();
        for entity in &self.world.entities {
            if !ids.insert(entity.id) {
                return Err(ScenarioError::ValidationError(format!("Duplicate entity id {}", entity.id)));
            }
        }

        self.validate_navigator()
    }

    fn validate_navigator(&self) -> Result<(), ScenarioError> {
        let nav = &self.navigator;

        let path = &nav.pathfinding;
        if path.min_step <= 0.0 || path.max_step < path.min_step {
            return Err(ScenarioError::ValidationError(
                "pathfinding steps must satisfy 0 < min_step <= max_step".to_string(),
            ));
        }
        if path.max_crop_points == 0 || path.crop_radius <= 0.0 {
            return Err(ScenarioError::ValidationError(
                "crop settings must be positive".to_string(),
            ));
        }

        let exploration = &nav.exploration;
        if exploration.exploration_radius <= 0.0 || exploration.coverage_radius <= 0.0 {
            return Err(ScenarioError::ValidationError("exploration radii must be positive".to_string()));
        }
        if !(exploration.discovery_percent > 0.0 && exploration.discovery_percent <= 1.0) {
            return Err(ScenarioError::ValidationError(format!(
                "discovery_percent {} must be in (0, 1]",
                exploration.discovery_percent
            )));
        }
        if exploration.max_discovery_points == 0 {
            return Err(ScenarioError::ValidationError("max_discovery_points must be positive".to_string()));
        }

        let stuck = &nav.stuck;
        if stuck.history_capacity < stuck.oscillation_window {
            return Err(ScenarioError::ValidationError(format!(
                "history_capacity {} is smaller than oscillation_window {}",
                stuck.history_capacity, stuck.oscillation_window
            )));
        }

        if nav.waypoint_tolerance <= 0.0 || nav.max_run_time_s <= 0.0 {
            return Err(ScenarioError::ValidationError(
                "waypoint_tolerance and max_run_time_s must be positive".to_string(),
            ));
        }
        if nav.movement_delay_s < 0.0 || nav.movement_jitter_s < 0.0 {
            return Err(ScenarioError::ValidationError(
                "movement_delay_s and movement_jitter_s must not be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("シード値: {}", self.sim.seed);
        println!();

        println!("=== 世界設定 ===");
        println!("開始位置: {}", self.world.start);
        let r = &self.world.region_rect;
        println!("領域: x[{:.0}, {:.0}] y[{:.0}, {:.0}]", r.xmin, r.xmax, r.ymin, r.ymax);
        println!("移動速度: {:.1}/秒", self.world.speed);
        println!("エンティティ: {}個", self.world.entities.len());
        for entity in &self.world.entities {
            println!("  {}: {} {}", entity.id, entity.label, entity.position);
        }
        println!(
            "ルートサービス: {}",
            if self.world.route_service.enabled { "有効" } else { "無効" }
        );
        println!();

        let nav = &self.navigator;
        println!("=== ナビゲーション設定 ===");
        println!("探索戦略: {:?}", nav.exploration.strategy);
        println!("探索半径: {:.0}", nav.exploration.exploration_radius);
        println!("完了カバレッジ: {:.0}%", nav.exploration.discovery_percent * 100.0);
        println!("到達判定距離: {:.0}", nav.waypoint_tolerance);
        println!("ドア自動操作: {}", nav.obstacles.auto_open_doors);
        println!("エリア遷移自動使用: {}", nav.obstacles.auto_use_transitions);
        println!("最大実行時間: {:.0}秒", nav.max_run_time_s);
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}
