use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::common::Position2D;

/// スタック時の推奨アクション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckAction {
    /// 問題なし
    Continue,
    /// 経路/目標を再計算
    Regenerate,
    /// 周辺の回避点へ移動
    MoveAround,
}

/// 運動状態の分類
///
/// 宣言順が優先度（先頭ほど深刻）を表します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MotionStatus {
    /// 一定時間ほぼ移動していない
    Stationary,
    /// 2つの近接クラスタ間を往復している
    Oscillating,
    /// 目標までの距離が縮まらない
    ProgressStalled,
    /// 正常
    Moving,
}

impl MotionStatus {
    pub fn recommended_action(&self) -> StuckAction {
        match self {
            MotionStatus::Stationary | MotionStatus::Oscillating => StuckAction::MoveAround,
            MotionStatus::ProgressStalled => StuckAction::Regenerate,
            MotionStatus::Moving => StuckAction::Continue,
        }
    }

    fn reason(&self, config: &StuckConfig) -> String {
        match self {
            MotionStatus::Stationary => {
                format!("{:.1}秒以上移動していません", config.dwell_seconds)
            }
            MotionStatus::Oscillating => "近接した位置の間を往復しています".to_string(),
            MotionStatus::ProgressStalled => "目標までの距離が縮まっていません".to_string(),
            MotionStatus::Moving => String::new(),
        }
    }
}

/// スタック判定結果
#[derive(Debug, Clone, PartialEq)]
pub struct StuckReport {
    /// 最も深刻な分類
    pub status: MotionStatus,
    pub action: StuckAction,
    /// 診断用の説明文
    pub reason: String,
    /// 同時に成立した全分類（優先度順）
    pub triggered: Vec<MotionStatus>,
}

impl StuckReport {
    pub fn is_stuck(&self) -> bool {
        self.status != MotionStatus::Moving
    }
}

/// スタック検出の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckConfig {
    pub enabled: bool,
    /// 移動と見なさない位置変化量
    pub stationary_distance: f64,
    /// 静止判定までの時間（秒）
    pub dwell_seconds: f64,
    /// 距離変化が無いと見なす閾値
    pub progress_epsilon: f64,
    /// 距離停滞の連続回数閾値
    pub stall_threshold: u32,
    /// 位置履歴の容量
    pub history_capacity: usize,
    /// 往復判定に必要なサンプル数
    pub oscillation_window: usize,
    /// 往復判定の距離
    pub oscillation_distance: f64,
    /// 回避点の探索半径
    pub recovery_distance: f64,
    pub seed: u64,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stationary_distance: 1.0,
            dwell_seconds: 3.0,
            progress_epsilon: 0.5,
            stall_threshold: 8,
            history_capacity: 10,
            oscillation_window: 6,
            oscillation_distance: 2.0,
            recovery_distance: 20.0,
            seed: 0,
        }
    }
}

/// スタック検出器
///
/// 直近の位置履歴から静止・往復・進捗停滞を毎ティック判定します。
/// 状態は `reset` でのみ初期化されます。
#[derive(Debug)]
pub struct StuckDetector {
    pub config: StuckConfig,
    recent_positions: VecDeque<Position2D>,
    last_position: Option<Position2D>,
    last_distance: Option<f64>,
    same_distance_count: u32,
    last_movement_time: Option<f64>,
    rng: ChaCha8Rng,
}

impl StuckDetector {
    pub fn new(config: StuckConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            recent_positions: VecDeque::with_capacity(config.history_capacity),
            config,
            last_position: None,
            last_distance: None,
            same_distance_count: 0,
            last_movement_time: None,
            rng,
        }
    }

    /// スタック判定
    ///
    /// # 引数
    ///
    /// * `current` - 現在位置
    /// * `distance_to_target` - 現在の目標までの距離
    /// * `now` - 現在時刻（秒）
    ///
    /// # 戻り値
    ///
    /// 最も深刻な分類と推奨アクション
    pub fn check_if_stuck(&mut self, current: Position2D, distance_to_target: f64, now: f64) -> StuckReport {
        self.recent_positions.push_back(current);
        while self.recent_positions.len() > self.config.history_capacity.max(1) {
            self.recent_positions.pop_front();
        }

        let mut triggered = Vec::new();

        // 静止判定
        let moved = self
            .last_position
            .is_none_or(|last| last.distance(&current) >= self.config.stationary_distance);
        if moved {
            self.last_movement_time = Some(now);
        } else if self
            .last_movement_time
            .is_some_and(|since| now - since > self.config.dwell_seconds)
        {
            triggered.push(MotionStatus::Stationary);
        }

        // 進捗停滞判定
        let same_distance = self
            .last_distance
            .is_some_and(|last| (distance_to_target - last).abs() < self.config.progress_epsilon);
        if same_distance {
            self.same_distance_count += 1;
            if self.same_distance_count > self.config.stall_threshold {
                triggered.push(MotionStatus::ProgressStalled);
            }
        } else {
            self.same_distance_count = 0;
        }

        if self.is_oscillating() {
            triggered.push(MotionStatus::Oscillating);
        }

        self.last_position = Some(current);
        self.last_distance = Some(distance_to_target);

        triggered.sort();
        let status = triggered.first().copied().unwrap_or(MotionStatus::Moving);
        let report = StuckReport {
            status,
            action: status.recommended_action(),
            reason: status.reason(&self.config),
            triggered,
        };

        if report.is_stuck() {
            warn!(
                status = ?report.status,
                action = ?report.action,
                position_x = current.x,
                position_y = current.y,
                distance_to_target,
                "STUCK_DETECTED: {}",
                report.reason
            );
        }

        report
    }

    /// 直近 `oscillation_window` 件で i と i+3 が近く、かつ静止判定の距離を超えて動いているか
    fn is_oscillating(&self) -> bool {
        let window = self.config.oscillation_window.max(4);
        if self.recent_positions.len() < window {
            return false;
        }

        let samples: Vec<Position2D> = self
            .recent_positions
            .iter()
            .skip(self.recent_positions.len() - window)
            .copied()
            .collect();

        let period = window / 2;
        let repeating = (0..window - period)
            .all(|i| samples[i].distance(&samples[i + period]) <= self.config.oscillation_distance);
        if !repeating {
            return false;
        }

        samples
            .iter()
            .enumerate()
            .any(|(i, a)| samples[i + 1..].iter().any(|b| a.distance(b) > self.config.stationary_distance))
    }

    /// 回避点の生成
    ///
    /// 一様ランダムな方位、`[radius/2, radius]` の距離に回避点を置きます。
    pub fn find_avoidance_point(&mut self, current: Position2D, radius: f64) -> Position2D {
        let angle = self.rng.random::<f64>() * std::f64::consts::TAU;
        let radius = radius.abs();
        let distance = if radius > 0.0 {
            self.rng.random_range(radius / 2.0..=radius)
        } else {
            0.0
        };

        let point = current + Position2D::new(angle.cos(), angle.sin()) * distance;
        debug!(from = %current, to = %point, distance, "回避点を生成");
        point
    }

    /// 設定値の回避半径で回避点を生成
    pub fn recovery_point(&mut self, current: Position2D) -> Position2D {
        let radius = self.config.recovery_distance;
        self.find_avoidance_point(current, radius)
    }

    pub fn history_len(&self) -> usize {
        self.recent_positions.len()
    }

    /// 履歴と内部状態を初期化
    pub fn reset(&mut self) {
        self.recent_positions.clear();
        self.last_position = None;
        self.last_distance = None;
        self.same_distance_count = 0;
        self.last_movement_time = None;
    }
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(StuckConfig::default())
    }
}
