//! # Exploration モジュール
//!
//! 未探索領域への発見点（フロンティア）の生成、巡回インデックスの管理、
//! 探索済み領域の記録とカバレッジ推定を提供します。
//!
//! ## フロンティア生成戦略
//!
//! - `Radial`: 8方位 × 複数距離で候補点をサンプリング
//! - `Directional`: 未探索サンプルの距離和が最大の方位へ1点だけ置く
//! - `Grid`: 格子点 + ランダム点で候補を作る

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::common::{Position2D, math_utils};
use crate::models::pathfinding::PathfindingEngine;

/// フロンティア生成戦略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierStrategy {
    Radial,
    Directional,
    Grid,
}

/// 探索プランナーの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    pub strategy: FrontierStrategy,
    /// 探索半径
    pub exploration_radius: f64,
    /// 探索済み判定の半径（1記録あたりのカバー半径）
    pub coverage_radius: f64,
    /// 探索完了と見なすカバレッジ比（この値以上で完了）
    pub discovery_percent: f64,
    /// 候補点の最大数
    pub max_discovery_points: usize,
    /// 方位数（360度を等分）
    pub direction_count: usize,
    /// サンプリング開始距離
    pub min_sample_distance: f64,
    /// サンプリング間隔
    pub sample_spacing: f64,
    /// Directional 戦略で置く点までの最大距離
    pub directional_step: f64,
    /// Directional 戦略のフォールバック試行回数
    pub random_fallback_attempts: usize,
    /// Grid 戦略で中心からの最小距離
    pub grid_min_distance: f64,
    /// 外部候補を受け入れる距離（`exploration_radius` の倍数）
    pub max_candidate_distance_factor: f64,
    /// 候補点を TSP で並べるかどうか
    pub optimize_with_tsp: bool,
    /// 探索済み記録を追加する移動距離
    pub record_distance: f64,
    /// 探索済み記録の上限
    pub max_explored_areas: usize,
    /// 上限超過時にまとめて削除する件数
    pub trim_batch: usize,
    pub seed: u64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: FrontierStrategy::Radial,
            exploration_radius: 80.0,
            coverage_radius: 25.0,
            discovery_percent: 0.93,
            max_discovery_points: 20,
            direction_count: 8,
            min_sample_distance: 30.0,
            sample_spacing: 20.0,
            directional_step: 40.0,
            random_fallback_attempts: 8,
            grid_min_distance: 20.0,
            max_candidate_distance_factor: 4.0,
            optimize_with_tsp: true,
            record_distance: 15.0,
            max_explored_areas: 200,
            trim_batch: 50,
            seed: 0,
        }
    }
}

/// 探索プランナー
#[derive(Debug)]
pub struct ExplorationPlanner {
    pub config: ExplorationConfig,
    explored_areas: Vec<Position2D>,
    last_recorded: Option<Position2D>,
    discovery_points: Vec<Position2D>,
    current_index: usize,
    generation: u64,
    rng: ChaCha8Rng,
}

impl ExplorationPlanner {
    pub fn new(config: ExplorationConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            explored_areas: Vec::new(),
            last_recorded: None,
            discovery_points: Vec::new(),
            current_index: 0,
            generation: 0,
            rng,
        }
    }

    /// 訪問位置の記録
    ///
    /// 直前の記録から `record_distance` より離れた場合のみ追加します。
    /// 上限を超えたら古い記録を `trim_batch` 件まとめて削除します。
    ///
    /// # 戻り値
    ///
    /// 記録した場合は true
    pub fn record_visited(&mut self, position: Position2D) -> bool {
        let should_record = self
            .last_recorded
            .is_none_or(|last| last.distance(&position) > self.config.record_distance);
        if !should_record {
            return false;
        }

        self.explored_areas.push(position);
        self.last_recorded = Some(position);

        if self.explored_areas.len() > self.config.max_explored_areas {
            let drop = self.config.trim_batch.clamp(1, self.explored_areas.len());
            self.explored_areas.drain(..drop);
            debug!(dropped = drop, remaining = self.explored_areas.len(), "探索済み記録を間引き");
        }

        true
    }

    /// 指定位置が探索済みかどうか
    pub fn is_explored(&self, position: Position2D, radius: f64) -> bool {
        self.explored_areas
            .iter()
            .any(|explored| explored.distance(&position) < radius)
    }

    /// カバレッジ推定値（0.0〜1.0）
    ///
    /// 記録ごとに `coverage_radius` の円が重ならずに並ぶと仮定した近似です。
    pub fn coverage_ratio(&self) -> f64 {
        let total = self.config.exploration_radius.powi(2);
        if total <= 0.0 {
            return 1.0;
        }
        let explored = self.explored_areas.len() as f64 * self.config.coverage_radius.powi(2);
        (explored / total).min(1.0)
    }

    /// 探索完了判定
    pub fn is_complete(&self) -> bool {
        self.coverage_ratio() >= self.config.discovery_percent
    }

    /// 発見点リストの再生成
    ///
    /// # 引数
    ///
    /// * `position` - 現在位置
    /// * `engine` - 順序最適化に使う経路エンジン
    /// * `extra_candidates` - 外部サービスから得た追加候補
    ///
    /// # 戻り値
    ///
    /// 並べ替え済みの発見点
    pub fn plan_frontier(
        &mut self,
        position: Position2D,
        engine: &PathfindingEngine,
        extra_candidates: &[Position2D],
    ) -> &[Position2D] {
        let mut candidates = match self.config.strategy {
            FrontierStrategy::Radial => self.radial_candidates(position),
            FrontierStrategy::Directional => self.directional_candidate(position).into_iter().collect(),
            FrontierStrategy::Grid => self.grid_candidates(position),
        };

        let reach = self.config.exploration_radius * self.config.max_candidate_distance_factor;
        candidates.extend(extra_candidates.iter().copied().filter(|c| {
            c.is_finite() && position.distance(c) <= reach && !self.is_explored(*c, self.config.coverage_radius)
        }));

        self.limit_to_closest(&mut candidates, position);
        self.discovery_points = self.order_candidates(candidates, position, engine);
        self.current_index = 0;
        self.generation += 1;

        info!(
            strategy = ?self.config.strategy,
            points = self.discovery_points.len(),
            generation = self.generation,
            coverage = self.coverage_ratio(),
            "FRONTIER_PLANNED: 発見点を生成しました"
        );

        &self.discovery_points
    }

    /// 現在の探索目標
    ///
    /// リストが空または消化済みなら再生成します。
    pub fn next_discovery_target(&mut self, position: Position2D, engine: &PathfindingEngine) -> Option<Position2D> {
        if self.is_exhausted() {
            self.plan_frontier(position, engine, &[]);
        }
        self.current_target()
    }

    /// 再生成せずに現在の目標を返す
    pub fn current_target(&self) -> Option<Position2D> {
        self.discovery_points.get(self.current_index).copied()
    }

    /// 次の発見点へ進む
    pub fn advance(&mut self) -> Option<Position2D> {
        if self.current_index < self.discovery_points.len() {
            self.current_index += 1;
        }
        self.current_target()
    }

    /// 発見点を使い切ったか（空リストも含む）
    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.discovery_points.len()
    }

    pub fn discovery_points(&self) -> &[Position2D] {
        &self.discovery_points
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn explored_areas(&self) -> &[Position2D] {
        &self.explored_areas
    }

    /// 発見点リストのみ破棄（探索済み記録は残す）
    pub fn discard_discovery_points(&mut self) {
        self.discovery_points.clear();
        self.current_index = 0;
    }

    /// すべての状態を破棄
    pub fn reset(&mut self) {
        self.explored_areas.clear();
        self.last_recorded = None;
        self.discard_discovery_points();
    }

    /// 360度を等分した方位（度）
    fn direction_headings(&self) -> Vec<f64> {
        let count = self.config.direction_count.max(1);
        (0..count).map(|i| i as f64 * 360.0 / count as f64).collect()
    }

    fn sample_distances(&self) -> Vec<f64> {
        let spacing = self.config.sample_spacing.max(1.0);
        let mut distances = Vec::new();
        let mut d = self.config.min_sample_distance;
        while d <= self.config.exploration_radius {
            distances.push(d);
            d += spacing;
        }
        distances
    }

    /// 8方位 × 複数距離の未探索サンプル
    fn radial_candidates(&self, position: Position2D) -> Vec<Position2D> {
        let distances = self.sample_distances();
        self.direction_headings()
            .into_iter()
            .map(Position2D::from_angle_deg)
            .flat_map(|dir| distances.iter().map(move |&d| position + dir * d))
            .filter(|p| !self.is_explored(*p, self.config.coverage_radius))
            .collect()
    }

    /// 未探索サンプルの距離和が最大の方位へ1点
    fn directional_candidate(&mut self, position: Position2D) -> Option<Position2D> {
        let distances = self.sample_distances();
        let mut best: Option<(f64, f64)> = None;

        for heading in self.direction_headings() {
            let dir = Position2D::from_angle_deg(heading);
            let score: f64 = distances
                .iter()
                .filter(|&&d| !self.is_explored(position + dir * d, self.config.coverage_radius))
                .sum();
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((heading, score));
            }
        }

        if let Some((heading, score)) = best {
            let reach = self.config.directional_step.min(self.config.exploration_radius * 0.8);
            debug!(score, heading_deg = math_utils::normalize_angle(heading), "最高スコア方位を選択");
            return Some(position + Position2D::from_angle_deg(heading) * reach);
        }

        // 全方位スコア0: ランダムな未探索点を探す
        let min_d = self.config.min_sample_distance.min(self.config.exploration_radius);
        for _ in 0..self.config.random_fallback_attempts {
            let angle = self.rng.random::<f64>() * std::f64::consts::TAU;
            let distance = if self.config.exploration_radius > min_d {
                self.rng.random_range(min_d..=self.config.exploration_radius)
            } else {
                min_d
            };
            let candidate = position + Position2D::new(angle.cos(), angle.sin()) * distance;
            if !self.is_explored(candidate, self.config.coverage_radius) {
                return Some(candidate);
            }
        }

        debug!("未探索の方位が見つかりません");
        None
    }

    /// 格子点 + ランダム点
    fn grid_candidates(&mut self, position: Position2D) -> Vec<Position2D> {
        const SECTIONS_PER_SIDE: i32 = 4;
        let radius = self.config.exploration_radius;
        let grid_size = radius / SECTIONS_PER_SIDE as f64;
        let mut points = Vec::new();

        for gx in -SECTIONS_PER_SIDE..=SECTIONS_PER_SIDE {
            for gy in -SECTIONS_PER_SIDE..=SECTIONS_PER_SIDE {
                if gx == 0 && gy == 0 {
                    continue;
                }
                let point = position + Position2D::new(gx as f64 * grid_size, gy as f64 * grid_size);
                let d = position.distance(&point);
                if d <= radius && d >= self.config.grid_min_distance {
                    points.push(point);
                }
            }
        }

        let min_d = self.config.min_sample_distance;
        if radius > min_d {
            for _ in 0..self.config.max_discovery_points / 4 {
                let angle = self.rng.random::<f64>() * std::f64::consts::TAU;
                let distance = self.rng.random_range(min_d..radius);
                points.push(position + Position2D::new(angle.cos(), angle.sin()) * distance);
            }
        }

        points.retain(|p| !self.is_explored(*p, self.config.coverage_radius));
        points
    }

    fn limit_to_closest(&self, candidates: &mut Vec<Position2D>, position: Position2D) {
        if candidates.len() > self.config.max_discovery_points {
            candidates.sort_by(|a, b| position.distance(a).total_cmp(&position.distance(b)));
            candidates.truncate(self.config.max_discovery_points);
        }
    }

    fn order_candidates(
        &self,
        mut candidates: Vec<Position2D>,
        position: Position2D,
        engine: &PathfindingEngine,
    ) -> Vec<Position2D> {
        if self.config.optimize_with_tsp && candidates.len() > 3 {
            // 現在位置を先頭に置いて最近傍法の起点にする
            let mut route = Vec::with_capacity(candidates.len() + 1);
            route.push(position);
            route.append(&mut candidates);
            let mut optimized = engine.optimize_route_tsp(&route);
            optimized.remove(0);
            optimized
        } else {
            candidates.sort_by(|a, b| position.distance(a).total_cmp(&position.distance(b)));
            candidates
        }
    }
}

impl Default for ExplorationPlanner {
    fn default() -> Self {
        Self::new(ExplorationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Position2D {
        Position2D::new(x, y)
    }

    #[test]
    fn test_radial_frontier_counts() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 100,
            optimize_with_tsp: false,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        // 距離 30, 50, 70 × 8方位
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert_eq!(points.len(), 24);
        assert!((points[0].distance(&p(0.0, 0.0)) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_radial_frontier_skips_explored() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 100,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        planner.record_visited(p(50.0, 0.0));
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert!(points.iter().all(|q| q.distance(&p(50.0, 0.0)) >= 25.0));
        assert!(points.len() < 24);
    }

    #[test]
    fn test_frontier_limited_to_closest() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 8,
            optimize_with_tsp: false,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert_eq!(points.len(), 8);
        assert!(points.iter().all(|q| (q.distance(&p(0.0, 0.0)) - 30.0).abs() < 1e-9));
    }

    #[test]
    fn test_tsp_ordering_is_permutation() {
        let engine = PathfindingEngine::default();
        let mut tsp = ExplorationPlanner::new(ExplorationConfig::default());
        let mut plain = ExplorationPlanner::new(ExplorationConfig {
            optimize_with_tsp: false,
            ..ExplorationConfig::default()
        });
        let a = tsp.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        let b = plain.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert_eq!(a.len(), b.len());
        for q in &a {
            assert!(b.contains(q));
        }
    }

    #[test]
    fn test_directional_prefers_unexplored_side() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            strategy: FrontierStrategy::Directional,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        // 東側以外を探索済みにする
        for deg in [45.0, 90.0, 135.0, 180.0, 225.0, 270.0, 315.0] {
            for d in [30.0, 50.0, 70.0] {
                let dir = Position2D::from_angle_deg(deg);
                planner.explored_areas.push(p(0.0, 0.0) + dir * d);
            }
        }
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert_eq!(points.len(), 1);
        assert!((points[0].x - 40.0).abs() < 1e-9);
        assert!(points[0].y.abs() < 1e-9);
    }

    #[test]
    fn test_directional_random_fallback_is_seeded() {
        let engine = PathfindingEngine::default();
        let config = ExplorationConfig {
            strategy: FrontierStrategy::Directional,
            coverage_radius: 75.0,
            exploration_radius: 80.0,
            seed: 7,
            ..ExplorationConfig::default()
        };
        let mut a = ExplorationPlanner::new(config.clone());
        let mut b = ExplorationPlanner::new(config);
        // 中心の記録で 30〜70 のサンプルはすべて探索済み、80 付近は未探索
        a.explored_areas.push(p(0.0, 0.0));
        b.explored_areas.push(p(0.0, 0.0));

        let pa = a.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        let pb = b.plan_frontier(p(0.0, 0.0), &engine, &[]).to_vec();
        assert_eq!(pa, pb);
        for q in &pa {
            assert!(q.distance(&p(0.0, 0.0)) >= 75.0);
        }
    }

    #[test]
    fn test_grid_frontier_within_bounds() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            strategy: FrontierStrategy::Grid,
            max_discovery_points: 40,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        let points = planner.plan_frontier(p(10.0, 10.0), &engine, &[]).to_vec();
        assert!(!points.is_empty());
        assert!(points.len() <= 40);
        for q in &points {
            let d = q.distance(&p(10.0, 10.0));
            assert!(d >= 20.0 - 1e-9 && d <= 80.0 + 1e-9, "distance {d}");
        }
    }

    #[test]
    fn test_extra_candidates_merged() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 100,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        let extra = [p(200.0, 200.0), p(f64::NAN, 0.0)];
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &extra).to_vec();
        assert_eq!(points.len(), 25);
        assert!(points.contains(&p(200.0, 200.0)));
    }

    #[test]
    fn test_distant_extra_candidates_rejected() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 100,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        let extra = [p(1.0e9, 0.0), p(0.0, 321.0), p(-300.0, 0.0)];
        let points = planner.plan_frontier(p(0.0, 0.0), &engine, &extra).to_vec();
        assert_eq!(points.len(), 25);
        assert!(points.contains(&p(-300.0, 0.0)));
        assert!(points.iter().all(|q| q.distance(&p(0.0, 0.0)) <= 320.0));
    }

    #[test]
    fn test_traversal_index_and_regeneration() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            max_discovery_points: 3,
            ..ExplorationConfig::default()
        });
        let engine = PathfindingEngine::default();
        assert!(planner.is_exhausted());

        let first = planner.next_discovery_target(p(0.0, 0.0), &engine);
        assert!(first.is_some());
        assert_eq!(planner.current_index(), 0);

        planner.advance();
        planner.advance();
        assert_eq!(planner.current_index(), 2);
        assert!(planner.advance().is_none());
        assert_eq!(planner.current_index(), 3);
        // 末尾を越えない
        planner.advance();
        assert_eq!(planner.current_index(), 3);
        assert!(planner.is_exhausted());

        assert!(planner.next_discovery_target(p(0.0, 0.0), &engine).is_some());
        assert_eq!(planner.current_index(), 0);
    }

    #[test]
    fn test_record_visited_distance_gate() {
        let mut planner = ExplorationPlanner::default();
        assert!(planner.record_visited(p(0.0, 0.0)));
        assert!(!planner.record_visited(p(10.0, 0.0)));
        assert!(!planner.record_visited(p(15.0, 0.0)));
        assert!(planner.record_visited(p(15.1, 0.0)));
        assert_eq!(planner.explored_areas().len(), 2);
    }

    #[test]
    fn test_record_visited_trims_batch() {
        let mut planner = ExplorationPlanner::default();
        for i in 0..201 {
            assert!(planner.record_visited(p(i as f64 * 20.0, 0.0)));
        }
        assert_eq!(planner.explored_areas().len(), 151);
        assert_eq!(planner.explored_areas()[0], p(50.0 * 20.0, 0.0));
    }

    #[test]
    fn test_coverage_monotonic_and_saturates() {
        let mut planner = ExplorationPlanner::default();
        let mut previous = planner.coverage_ratio();
        assert_eq!(previous, 0.0);
        for i in 0..20 {
            planner.record_visited(p(i as f64 * 30.0, 0.0));
            let ratio = planner.coverage_ratio();
            assert!(ratio >= previous);
            previous = ratio;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_completion_boundary_inclusive() {
        let mut planner = ExplorationPlanner::new(ExplorationConfig {
            exploration_radius: 50.0,
            coverage_radius: 25.0,
            discovery_percent: 0.5,
            ..ExplorationConfig::default()
        });
        // 1記録 = 625/2500 = 0.25
        planner.record_visited(p(0.0, 0.0));
        assert!(!planner.is_complete());
        planner.record_visited(p(100.0, 0.0));
        assert_eq!(planner.coverage_ratio(), 0.5);
        assert!(planner.is_complete());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut planner = ExplorationPlanner::default();
        let engine = PathfindingEngine::default();
        planner.record_visited(p(0.0, 0.0));
        planner.plan_frontier(p(0.0, 0.0), &engine, &[]);
        planner.reset();
        assert!(planner.explored_areas().is_empty());
        assert!(planner.discovery_points().is_empty());
        assert_eq!(planner.current_index(), 0);
        assert!(planner.record_visited(p(1.0, 0.0)));
    }
}
