//! # Pathfinding モジュール
//!
//! 直線補間による経路生成、エージェント周辺への経路切り出し（クロップ）、
//! 巡回順序の最適化（最近傍法 + 2-opt）を提供します。
//!
//! 障害物を考慮したグリッド探索は行いません。外部ルートサービスの結果は
//! `store_route` でキャッシュに格納できます。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::models::common::{math_utils, Position2D};

/// 経路生成・最適化の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    /// 適応ステップ幅の下限
    pub min_step: f64,
    /// 適応ステップ幅の上限
    pub max_step: f64,
    /// 終点補正の許容距離
    pub end_epsilon: f64,
    /// クロップ経路の最大点数
    pub max_crop_points: usize,
    /// クロップ半径
    pub crop_radius: f64,
    /// 2-opt の最大パス数（1 = 単一の全探索パス）
    pub two_opt_max_passes: usize,
    /// 経路キャッシュの最大エントリ数
    pub cache_capacity: usize,
    /// キャッシュキーの格子サイズ（0以下なら座標の完全一致）
    pub cache_cell_size: f64,
    /// 1経路の最大点数
    pub max_path_points: usize,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            min_step: 5.0,
            max_step: 15.0,
            end_epsilon: 5.0,
            max_crop_points: 6,
            crop_radius: 40.0,
            two_opt_max_passes: 1,
            cache_capacity: 64,
            cache_cell_size: 5.0,
            max_path_points: 500,
        }
    }
}

/// キャッシュキー（始点・終点を格子セルに丸めたもの）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PathKey {
    start: (i64, i64),
    end: (i64, i64),
}

impl PathKey {
    fn new(start: Position2D, end: Position2D, cell_size: f64) -> Self {
        let cell = |p: Position2D| (snap(p.x, cell_size), snap(p.y, cell_size));
        Self {
            start: cell(start),
            end: cell(end),
        }
    }
}

fn snap(value: f64, cell_size: f64) -> i64 {
    if cell_size > 0.0 {
        (value / cell_size).round() as i64
    } else {
        value.to_bits() as i64
    }
}

/// キャッシュ統計
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// 経路エンジン
#[derive(Debug)]
pub struct PathfindingEngine {
    pub config: PathfindingConfig,
    path_cache: HashMap<PathKey, Vec<Position2D>>,
    cache_hits: u64,
    cache_misses: u64,
}

impl PathfindingEngine {
    pub fn new(config: PathfindingConfig) -> Self {
        Self {
            config,
            path_cache: HashMap::new(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// 始点から終点までの直線補間経路を生成
    ///
    /// ステップ幅は `clamp(距離/10, min_step, max_step)` で決まり、
    /// 両端を含む `steps + 1` 点を返します。点数は `max_path_points` で頭打ちになり、
    /// 遠距離ではステップ幅が広がります。最後の点が終点から
    /// `end_epsilon` より離れている場合は終点をそのまま追加します。
    ///
    /// # 引数
    ///
    /// * `start` - 始点
    /// * `end` - 終点
    ///
    /// # 戻り値
    ///
    /// ウェイポイント列（`start == end` の場合は1点のみ）
    pub fn generate_path(&self, start: Position2D, end: Position2D) -> Vec<Position2D> {
        let distance = start.distance(&end);
        if distance == 0.0 {
            return vec![start];
        }

        let step_size = math_utils::clamp(distance / 10.0, self.config.min_step, self.config.max_step);
        let max_steps = self.config.max_path_points.max(2) - 1;
        let steps = ((distance / step_size).floor() as usize).clamp(1, max_steps);

        let mut path: Vec<Position2D> = (0..=steps)
            .map(|i| start.lerp(&end, i as f64 / steps as f64))
            .collect();

        // 終点に確実に到達させる
        let needs_end = path
            .last()
            .is_none_or(|last| last.distance(&end) > self.config.end_epsilon);
        if needs_end {
            path.push(end);
        }

        trace!(steps, step_size, points = path.len(), "経路生成");
        path
    }

    /// キャッシュ付きの経路生成
    pub fn plan_path(&mut self, start: Position2D, end: Position2D) -> Vec<Position2D> {
        let key = self.cache_key(start, end);
        if let Some(path) = self.path_cache.get(&key) {
            self.cache_hits += 1;
            return path.clone();
        }

        self.cache_misses += 1;
        let path = self.generate_path(start, end);
        self.insert_cache(key, path.clone());
        path
    }

    /// 外部で計算した経路をキャッシュに格納
    pub fn store_route(&mut self, start: Position2D, end: Position2D, path: Vec<Position2D>) {
        if path.is_empty() {
            return;
        }
        let key = self.cache_key(start, end);
        self.insert_cache(key, path);
    }

    /// キャッシュ済み経路の参照（統計は更新しない）
    pub fn cached_route(&self, start: Position2D, end: Position2D) -> Option<&[Position2D]> {
        self.path_cache
            .get(&self.cache_key(start, end))
            .map(|p| p.as_slice())
    }

    fn cache_key(&self, start: Position2D, end: Position2D) -> PathKey {
        PathKey::new(start, end, self.config.cache_cell_size)
    }

    fn insert_cache(&mut self, key: PathKey, path: Vec<Position2D>) {
        if self.config.cache_capacity == 0 {
            return;
        }
        if self.path_cache.len() >= self.config.cache_capacity && !self.path_cache.contains_key(&key) {
            debug!(entries = self.path_cache.len(), "経路キャッシュが上限に達したためクリア");
            self.path_cache.clear();
        }
        self.path_cache.insert(key, path);
    }

    /// 現在位置周辺の経路を切り出す
    ///
    /// 現在位置に最も近い経路点（同距離なら小さいインデックス）から前方に走査し、
    /// 半径内の点を最大 `max_crop_points` 点まで集めます。半径の外に出た
    /// 最初の点は先読みとして1点だけ追加して終了します。
    ///
    /// # 引数
    ///
    /// * `full_path` - 元の経路
    /// * `current` - 現在位置
    /// * `radius` - 切り出し半径
    ///
    /// # 戻り値
    ///
    /// 切り出した経路（入力が空の場合のみ空）
    pub fn crop_path(&self, full_path: &[Position2D], current: Position2D, radius: f64) -> Vec<Position2D> {
        let Some(closest_index) = math_utils::nearest_index(full_path, &current) else {
            return Vec::new();
        };

        let mut cropped = Vec::new();
        for point in &full_path[closest_index..] {
            if point.distance(&current) <= radius {
                cropped.push(*point);
                if cropped.len() >= self.config.max_crop_points {
                    break;
                }
            } else if !cropped.is_empty() {
                // 半径外の1点を先読みとして追加
                cropped.push(*point);
                break;
            }
        }

        if cropped.is_empty() {
            vec![full_path[0]]
        } else {
            cropped
        }
    }

    /// 訪問順序の最適化（最近傍法 + 2-opt）
    ///
    /// 3点以下はそのまま返します。2-opt は既定で1回の全探索パスのみ行い、
    /// `two_opt_max_passes` を増やすと改善がなくなるまで（上限付きで）繰り返します。
    /// 結果は常に入力の並べ替えです。
    pub fn optimize_route_tsp(&self, points: &[Position2D]) -> Vec<Position2D> {
        if points.len() <= 3 {
            return points.to_vec();
        }

        let nearest = Self::nearest_neighbor_order(points);
        let before = Self::tour_length(&nearest);
        let improved = self.two_opt(nearest);

        debug!(
            points = points.len(),
            nearest_neighbor_length = before,
            optimized_length = Self::tour_length(&improved),
            "巡回順序を最適化"
        );
        improved
    }

    /// 先頭点から始める最近傍法
    fn nearest_neighbor_order(points: &[Position2D]) -> Vec<Position2D> {
        let mut remaining: Vec<Position2D> = points[1..].to_vec();
        let mut tour = Vec::with_capacity(points.len());
        let mut current = points[0];
        tour.push(current);

        while let Some(index) = math_utils::nearest_index(&remaining, &current) {
            current = remaining.remove(index);
            tour.push(current);
        }

        tour
    }

    /// 2-opt 改善（始点は固定、開いた経路の長さで評価）
    fn two_opt(&self, mut tour: Vec<Position2D>) -> Vec<Position2D> {
        let n = tour.len();
        if n < 4 {
            return tour;
        }

        for pass in 0..self.config.two_opt_max_passes.max(1) {
            let mut best_length = Self::tour_length(&tour);
            let mut improved = false;

            for i in 1..n - 2 {
                for k in (i + 1)..n {
                    if k - i == 1 {
                        continue;
                    }

                    let mut candidate = tour.clone();
                    candidate[i..=k].reverse();
                    let length = Self::tour_length(&candidate);

                    if length < best_length {
                        tour = candidate;
                        best_length = length;
                        improved = true;
                    }
                }
            }

            trace!(pass, improved, length = best_length, "2-opt パス完了");
            if !improved {
                break;
            }
        }

        tour
    }

    /// 開いた経路の総延長
    pub fn tour_length(points: &[Position2D]) -> f64 {
        math_utils::polyline_length(points)
    }

    /// エリア変更時のキャッシュ破棄
    pub fn clear_cache(&mut self) {
        if !self.path_cache.is_empty() {
            debug!(entries = self.path_cache.len(), "経路キャッシュをクリア");
        }
        self.path_cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.cache_hits,
            misses: self.cache_misses,
            entries: self.path_cache.len(),
        }
    }
}

impl Default for PathfindingEngine {
    fn default() -> Self {
        Self::new(PathfindingConfig::default())
    }
}
