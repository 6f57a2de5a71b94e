//! # Navigator モジュール
//!
//! 経路エンジン・探索プランナー・スタック検出器・障害物トラッカーを1つの
//! コンテキストとして所有し、ティックごとに「どこへ動くか」を決定します。
//!
//! ## ティック内の判定順序
//!
//! 1. 停止中/キャンセル済みなら何もしない
//! 2. 位置取得（取得不可はスキップ）
//! 3. 最大実行時間の確認
//! 4. 探索済み領域の記録
//! 5. ドア・エリア遷移の操作
//! 6. 探索目標の更新と移動（スタック時は回復行動）
//! 7. 目標が無ければ完了判定または発見点の再生成

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::{
    actuation::{ActuationConfig, ActuationRequest},
    common::Position2D,
    error::{NavError, NavResult},
    exploration::{ExplorationConfig, ExplorationPlanner},
    obstacle::{ObstacleCategory, ObstacleConfig, ObstacleInteraction, ObstacleInteractionTracker},
    pathfinding::{PathfindingConfig, PathfindingEngine},
    stuck_detector::{MotionStatus, StuckAction, StuckConfig, StuckDetector},
    traits::{IEntityFeed, IPositionFeed, IRouteService},
};

/// ナビゲーター全体の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub pathfinding: PathfindingConfig,
    pub exploration: ExplorationConfig,
    pub stuck: StuckConfig,
    pub obstacles: ObstacleConfig,
    pub actuation: ActuationConfig,
    /// 目標到達と見なす距離
    pub waypoint_tolerance: f64,
    /// 探索目標の更新間隔（秒）
    pub exploration_update_interval_s: f64,
    /// 最大実行時間（秒）
    pub max_run_time_s: f64,
    /// 外部ルートサービスのタイムアウト（ミリ秒）
    pub route_timeout_ms: u64,
    /// 外部クラスタ問い合わせに使うカテゴリ名
    pub cluster_category: String,
    /// 移動指示の最小間隔（秒）
    pub movement_delay_s: f64,
    /// 移動間隔に加えるランダム幅の上限（秒）
    pub movement_jitter_s: f64,
    pub seed: u64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            pathfinding: PathfindingConfig::default(),
            exploration: ExplorationConfig::default(),
            stuck: StuckConfig::default(),
            obstacles: ObstacleConfig::default(),
            actuation: ActuationConfig::default(),
            waypoint_tolerance: 15.0,
            exploration_update_interval_s: 2.0,
            max_run_time_s: 600.0,
            route_timeout_ms: 500,
            cluster_category: "unexplored".to_string(),
            movement_delay_s: 0.2,
            movement_jitter_s: 0.15,
            seed: 0,
        }
    }
}

/// ナビゲーション終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// カバレッジが閾値に達した
    Complete,
    /// 最大実行時間を超えた
    Timeout,
}

/// ティックごとの決定
#[derive(Debug, Clone, PartialEq)]
pub enum NavCommand {
    /// このティックは何もしない
    Idle,
    /// 探索目標へ向けて移動（`waypoint` はクロップ経路の先読み点）
    Move { target: Position2D, waypoint: Position2D },
    /// スタックからの回復移動
    Recover { waypoint: Position2D, status: MotionStatus },
    /// 障害物を操作
    Interact(ObstacleInteraction),
    /// ナビゲーション終了
    Finished(FinishReason),
}

impl NavCommand {
    /// アクチュエーション層へ渡すリクエスト
    pub fn actuation(&self) -> Option<ActuationRequest> {
        match self {
            NavCommand::Move { waypoint, .. } | NavCommand::Recover { waypoint, .. } => {
                Some(ActuationRequest::Move(*waypoint))
            }
            NavCommand::Interact(interaction) => Some(ActuationRequest::Interact {
                entity_id: interaction.entity_id,
                position: interaction.position,
            }),
            NavCommand::Idle | NavCommand::Finished(_) => None,
        }
    }
}

/// 外部からナビゲーションを中断するためのハンドル
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// 実行統計
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigatorStats {
    pub ticks: u64,
    pub unavailable_ticks: u64,
    pub moves: u64,
    pub recoveries: u64,
    pub interactions: u64,
    pub regenerations: u64,
    pub targets_reached: u64,
    pub route_fallbacks: u64,
    /// 移動間隔の制限で見送ったティック
    pub throttled: u64,
}

#[derive(Debug, Clone)]
struct ActiveRoute {
    target: Position2D,
    path: Vec<Position2D>,
}

/// ナビゲーター
#[derive(Debug)]
pub struct Navigator {
    pub config: NavigatorConfig,
    pub pathfinding: PathfindingEngine,
    pub exploration: ExplorationPlanner,
    pub stuck_detector: StuckDetector,
    pub obstacles: ObstacleInteractionTracker,
    running: bool,
    completed: bool,
    started_at: Option<f64>,
    last_exploration_update: Option<f64>,
    exploration_target: Option<Position2D>,
    active_route: Option<ActiveRoute>,
    next_move_at: Option<f64>,
    cancel: Arc<watch::Sender<bool>>,
    stats: NavigatorStats,
    rng: ChaCha8Rng,
}

impl Navigator {
    pub fn new(config: NavigatorConfig) -> Self {
        Self {
            pathfinding: PathfindingEngine::new(config.pathfinding.clone()),
            exploration: ExplorationPlanner::new(config.exploration.clone()),
            stuck_detector: StuckDetector::new(config.stuck.clone()),
            obstacles: ObstacleInteractionTracker::new(config.obstacles.clone()),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            running: false,
            completed: false,
            started_at: None,
            last_exploration_update: None,
            exploration_target: None,
            active_route: None,
            next_move_at: None,
            cancel: Arc::new(watch::channel(false).0),
            stats: NavigatorStats::default(),
        }
    }

    /// ナビゲーション開始
    pub fn start(&mut self, now: f64) {
        self.reset_cancel_signal();
        self.running = true;
        self.completed = false;
        self.started_at = Some(now);
        self.last_exploration_update = None;
        self.exploration_target = None;
        self.active_route = None;
        self.next_move_at = None;
        self.exploration.reset();
        self.stuck_detector.reset();

        info!(start_time = now, "NAVIGATION_STARTED: ナビゲーションを開始しました");
    }

    /// ナビゲーション停止
    pub fn stop(&mut self) {
        self.reset_cancel_signal();
        if self.running {
            info!(
                ticks = self.stats.ticks,
                explored = self.exploration.explored_areas().len(),
                coverage = self.exploration.coverage_ratio(),
                "NAVIGATION_STOPPED: ナビゲーションを停止しました"
            );
        }
        self.running = false;
        self.exploration_target = None;
        self.active_route = None;
    }

    /// エリア/コンテキスト変更時のリセット
    pub fn on_area_change(&mut self) {
        self.pathfinding.clear_cache();
        self.exploration.reset();
        self.stuck_detector.reset();
        self.obstacles.reset();
        self.exploration_target = None;
        self.active_route = None;
        self.last_exploration_update = None;

        info!("AREA_CHANGED: エリア変更に伴い状態をリセットしました");
    }

    /// 進行中の処理をキャンセルし、新しいシグナルに差し替える
    fn reset_cancel_signal(&mut self) {
        self.cancel.send_replace(true);
        self.cancel = Arc::new(watch::channel(false).0);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn exploration_target(&self) -> Option<Position2D> {
        self.exploration_target
    }

    pub fn stats(&self) -> NavigatorStats {
        self.stats
    }

    /// 1ティック分の判定
    ///
    /// # 引数
    ///
    /// * `now` - 現在時刻（秒）
    /// * `position_feed` - 自己位置フィード
    /// * `entity_feed` - 周辺エンティティフィード
    /// * `route_service` - 外部ルートサービス（任意）
    ///
    /// # 戻り値
    ///
    /// このティックの決定。位置が取得できない場合は `NavError::Unavailable`
    pub async fn tick(
        &mut self,
        now: f64,
        position_feed: &dyn IPositionFeed,
        entity_feed: &dyn IEntityFeed,
        route_service: Option<&dyn IRouteService>,
    ) -> NavResult<NavCommand> {
        if self.running && *self.cancel.borrow() {
            info!("外部からキャンセルされました");
            self.stop();
        }
        if !self.running {
            return Ok(NavCommand::Idle);
        }
        self.stats.ticks += 1;

        let Some(position) = position_feed.current_position() else {
            self.stats.unavailable_ticks += 1;
            return Err(NavError::Unavailable("位置情報を取得できません".to_string()));
        };
        if !position.is_finite() {
            return Err(NavError::InvalidInput(format!("非有限の位置: {position:?}")));
        }

        let started_at = *self.started_at.get_or_insert(now);
        if now - started_at > self.config.max_run_time_s {
            warn!(
                elapsed = now - started_at,
                max_run_time = self.config.max_run_time_s,
                "NAVIGATION_TIMEOUT: 最大実行時間を超えました"
            );
            self.stop();
            return Ok(NavCommand::Finished(FinishReason::Timeout));
        }

        self.exploration.record_visited(position);

        if let Some(interaction) = self.check_obstacles(position, entity_feed) {
            self.stats.interactions += 1;
            self.active_route = None;
            return Ok(NavCommand::Interact(interaction));
        }

        let refresh_due = self
            .last_exploration_update
            .is_none_or(|last| now - last >= self.config.exploration_update_interval_s);
        if refresh_due {
            self.refresh_exploration_target(position, route_service);
            self.last_exploration_update = Some(now);
        }

        match self.exploration_target {
            Some(target) => {
                let distance = position.distance(&target);
                if distance > self.config.waypoint_tolerance {
                    self.move_toward(position, target, distance, now, route_service).await
                } else {
                    self.on_target_reached(target);
                    Ok(NavCommand::Idle)
                }
            }
            None => {
                if self.exploration.is_complete() {
                    self.completed = true;
                    info!(
                        explored = self.exploration.explored_areas().len(),
                        coverage = self.exploration.coverage_ratio(),
                        elapsed = now - started_at,
                        "EXPLORATION_COMPLETED: 探索が完了しました"
                    );
                    self.stop();
                    return Ok(NavCommand::Finished(FinishReason::Complete));
                }

                self.regenerate(position, route_service);
                self.exploration_target = self.exploration.current_target();
                if self.exploration_target.is_none() {
                    debug!("生成できる発見点がありません");
                }
                Ok(NavCommand::Idle)
            }
        }
    }

    fn check_obstacles(&mut self, position: Position2D, entity_feed: &dyn IEntityFeed) -> Option<ObstacleInteraction> {
        let categories: Vec<ObstacleCategory> = [ObstacleCategory::Door, ObstacleCategory::Transition]
            .into_iter()
            .filter(|c| self.obstacles.config.is_enabled(*c))
            .collect();
        if categories.is_empty() {
            return None;
        }

        let radius = categories
            .iter()
            .map(|c| self.obstacles.config.detection_radius(*c))
            .fold(0.0, f64::max);

        let entities = match entity_feed.nearby_entities(position, radius) {
            Ok(entities) => entities,
            Err(err) => {
                debug!(error = %err, "エンティティ取得に失敗したため障害物判定をスキップ");
                return None;
            }
        };

        categories
            .into_iter()
            .find_map(|category| self.obstacles.check(category, position, &entities))
    }

    fn refresh_exploration_target(&mut self, position: Position2D, route_service: Option<&dyn IRouteService>) {
        // 完了済みなら再生成せず、完了判定に任せる
        if self.exploration.is_exhausted() && !self.exploration.is_complete() {
            self.regenerate(position, route_service);
        }
        let target = self.exploration.current_target();
        if target != self.exploration_target {
            self.active_route = None;
        }
        self.exploration_target = target;
    }

    fn regenerate(&mut self, position: Position2D, route_service: Option<&dyn IRouteService>) {
        let extra = route_service
            .map(|service| {
                service.cluster_by_category(&self.config.cluster_category, self.exploration.config.exploration_radius)
            })
            .unwrap_or_default();

        self.exploration.plan_frontier(position, &self.pathfinding, &extra);
        self.active_route = None;
        self.stats.regenerations += 1;
    }

    fn on_target_reached(&mut self, target: Position2D) {
        self.stats.targets_reached += 1;
        self.exploration_target = self.exploration.advance();
        self.active_route = None;
        self.stuck_detector.reset();

        debug!(
            reached = %target,
            index = self.exploration.current_index(),
            total = self.exploration.discovery_points().len(),
            "発見点に到達"
        );
    }

    async fn move_toward(
        &mut self,
        position: Position2D,
        target: Position2D,
        distance: f64,
        now: f64,
        route_service: Option<&dyn IRouteService>,
    ) -> NavResult<NavCommand> {
        if self.stuck_detector.config.enabled {
            let report = self.stuck_detector.check_if_stuck(position, distance, now);
            match report.action {
                StuckAction::MoveAround => {
                    let waypoint = self.stuck_detector.recovery_point(position);
                    self.stuck_detector.reset();
                    self.active_route = None;
                    self.stats.recoveries += 1;
                    self.schedule_next_move(now);
                    return Ok(NavCommand::Recover {
                        waypoint,
                        status: report.status,
                    });
                }
                StuckAction::Regenerate => {
                    self.stuck_detector.reset();
                    self.stats.recoveries += 1;
                    self.regenerate(position, route_service);
                    self.exploration_target = self.exploration.current_target();
                    info!(
                        new_target = ?self.exploration_target,
                        "ROUTE_REGENERATED: 進捗が無いため発見点を再生成しました"
                    );
                    return Ok(NavCommand::Idle);
                }
                StuckAction::Continue => {}
            }
        }

        if self.next_move_at.is_some_and(|at| now < at) {
            self.stats.throttled += 1;
            return Ok(NavCommand::Idle);
        }

        self.ensure_route(position, target, route_service).await;

        let path = self
            .active_route
            .as_ref()
            .map(|route| route.path.as_slice())
            .unwrap_or_default();
        let cropped = self
            .pathfinding
            .crop_path(path, position, self.pathfinding.config.crop_radius);
        let waypoint = cropped.last().copied().unwrap_or(target);

        self.stats.moves += 1;
        self.schedule_next_move(now);
        Ok(NavCommand::Move { target, waypoint })
    }

    /// 次の移動指示を出せる時刻を決める
    fn schedule_next_move(&mut self, now: f64) {
        let jitter = if self.config.movement_jitter_s > 0.0 {
            self.rng.random_range(0.0..=self.config.movement_jitter_s)
        } else {
            0.0
        };
        self.next_move_at = Some(now + self.config.movement_delay_s.max(0.0) + jitter);
    }

    async fn ensure_route(
        &mut self,
        position: Position2D,
        target: Position2D,
        route_service: Option<&dyn IRouteService>,
    ) {
        if self.active_route.as_ref().is_some_and(|route| route.target == target) {
            return;
        }

        let cached = self.pathfinding.cached_route(position, target).map(<[Position2D]>::to_vec);
        let path = match (route_service, cached) {
            (Some(_), Some(cached)) => cached,
            (Some(service), None) => match self.lookup_route(service, position, target).await {
                Ok(route) if !route.is_empty() => {
                    self.pathfinding.store_route(position, target, route.clone());
                    route
                }
                Ok(_) => {
                    self.stats.route_fallbacks += 1;
                    self.pathfinding.plan_path(position, target)
                }
                Err(err) => {
                    warn!(error = %err, "ROUTE_FALLBACK: 外部ルート探索に失敗したため直線経路を使用します");
                    self.stats.route_fallbacks += 1;
                    self.pathfinding.plan_path(position, target)
                }
            },
            (None, _) => self.pathfinding.plan_path(position, target),
        };

        debug!(target = %target, points = path.len(), "経路を設定");
        self.active_route = Some(ActiveRoute { target, path });
    }

    /// 外部ルートサービスの呼び出し（タイムアウト・キャンセル付き）
    async fn lookup_route(
        &self,
        service: &dyn IRouteService,
        from: Position2D,
        target: Position2D,
    ) -> NavResult<Vec<Position2D>> {
        let mut cancel_rx = self.cancel.subscribe();
        let timeout = Duration::from_millis(self.config.route_timeout_ms);

        tokio::select! {
            result = tokio::time::timeout(timeout, service.lookup_route(from, target)) => {
                result.unwrap_or_else(|_| Err(NavError::Cancelled("ルート探索がタイムアウトしました".to_string())))
            }
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                Err(NavError::Cancelled("ナビゲーションが停止されました".to_string()))
            }
        }
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(NavigatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::traits::{Entity, RouteFuture};
    use std::sync::Mutex;

    struct FixedFeed(Mutex<Vec<Option<Position2D>>>);

    impl FixedFeed {
        fn at(x: f64, y: f64) -> Self {
            Self(Mutex::new(vec![Some(Position2D::new(x, y))]))
        }

        /// 呼び出しごとに順番に返す（最後の値は繰り返す）
        fn sequence(positions: Vec<Option<Position2D>>) -> Self {
            Self(Mutex::new(positions))
        }
    }

    impl IPositionFeed for FixedFeed {
        fn current_position(&self) -> Option<Position2D> {
            let mut positions = self.0.lock().unwrap();
            if positions.len() > 1 {
                positions.remove(0)
            } else {
                positions[0]
            }
        }
    }

    struct Entities(NavResult<Vec<Entity>>);

    impl IEntityFeed for Entities {
        fn nearby_entities(&self, _center: Position2D, _radius: f64) -> NavResult<Vec<Entity>> {
            self.0.clone()
        }
    }

    fn no_entities() -> Entities {
        Entities(Ok(Vec::new()))
    }

    struct DetourService {
        delay_ms: u64,
    }

    impl IRouteService for DetourService {
        fn lookup_route<'a>(&'a self, from: Position2D, target: Position2D) -> RouteFuture<'a> {
            let delay = self.delay_ms;
            Box::pin(async move {
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                let mid = Position2D::new(from.x, target.y);
                Ok(vec![from, mid, target])
            })
        }

        fn cluster_by_category(&self, _category: &str, _radius: f64) -> Vec<Position2D> {
            vec![Position2D::new(0.0, 40.0)]
        }
    }

    #[tokio::test]
    async fn test_idle_until_started() {
        let mut nav = Navigator::default();
        let cmd = nav.tick(0.0, &FixedFeed::at(0.0, 0.0), &no_entities(), None).await;
        assert_eq!(cmd, Ok(NavCommand::Idle));
        assert_eq!(nav.stats().ticks, 0);
    }

    #[tokio::test]
    async fn test_missing_position_is_unavailable() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let feed = FixedFeed::sequence(vec![None]);
        let result = nav.tick(0.0, &feed, &no_entities(), None).await;
        assert!(matches!(result, Err(NavError::Unavailable(_))));
        assert_eq!(nav.stats().unavailable_ticks, 1);
        // 原点は正当な座標として扱われる
        let cmd = nav.tick(0.1, &FixedFeed::at(0.0, 0.0), &no_entities(), None).await.unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
    }

    #[tokio::test]
    async fn test_non_finite_position_rejected() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let result = nav.tick(0.0, &FixedFeed::at(f64::NAN, 0.0), &no_entities(), None).await;
        assert!(matches!(result, Err(NavError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_first_tick_moves_toward_cropped_waypoint() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let cmd = nav.tick(0.0, &FixedFeed::at(0.0, 0.0), &no_entities(), None).await.unwrap();

        let NavCommand::Move { target, waypoint } = cmd else {
            panic!("expected move, got {cmd:?}");
        };
        assert_eq!(Some(target), nav.exploration_target());
        assert!(waypoint.distance(&Position2D::new(0.0, 0.0)) <= target.distance(&Position2D::new(0.0, 0.0)) + 1e-9);
        assert!(!nav.exploration.discovery_points().is_empty());
        assert_eq!(nav.exploration.explored_areas().len(), 1);
    }

    #[tokio::test]
    async fn test_door_interaction_takes_priority() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let entities = Entities(Ok(vec![Entity {
            id: 77,
            position: Position2D::new(5.0, 0.0),
            label: "Metadata/Terrain/Doors/Door".to_string(),
        }]));
        let feed = FixedFeed::at(0.0, 0.0);

        let cmd = nav.tick(0.0, &feed, &entities, None).await.unwrap();
        let NavCommand::Interact(interaction) = &cmd else {
            panic!("expected interaction, got {cmd:?}");
        };
        assert_eq!(interaction.entity_id, 77);
        assert!(matches!(cmd.actuation(), Some(ActuationRequest::Interact { entity_id: 77, .. })));

        // 2回目は操作済みなので探索に進む
        let cmd = nav.tick(0.1, &feed, &entities, None).await.unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
    }

    #[tokio::test]
    async fn test_entity_feed_failure_skips_obstacles() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let entities = Entities(Err(NavError::Unavailable("entity list".into())));
        let cmd = nav.tick(0.0, &FixedFeed::at(0.0, 0.0), &entities, None).await.unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
    }

    #[tokio::test]
    async fn test_timeout_finishes_navigation() {
        let mut nav = Navigator::new(NavigatorConfig {
            max_run_time_s: 5.0,
            ..NavigatorConfig::default()
        });
        nav.start(10.0);
        let feed = FixedFeed::at(0.0, 0.0);
        assert!(nav.tick(12.0, &feed, &no_entities(), None).await.is_ok());
        let cmd = nav.tick(15.5, &feed, &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Finished(FinishReason::Timeout));
        assert!(!nav.is_running());
    }

    #[tokio::test]
    async fn test_completion_after_targets_reached() {
        let mut nav = Navigator::new(NavigatorConfig {
            waypoint_tolerance: 1000.0,
            exploration: ExplorationConfig {
                max_discovery_points: 1,
                // 2記録で完了（1記録 = 625/6400）
                discovery_percent: 0.15,
                ..ExplorationConfig::default()
            },
            ..NavigatorConfig::default()
        });
        nav.start(0.0);
        let feed = FixedFeed::sequence(vec![Some(Position2D::new(0.0, 0.0)), Some(Position2D::new(20.0, 0.0))]);

        assert_eq!(nav.tick(0.0, &feed, &no_entities(), None).await.unwrap(), NavCommand::Idle);
        assert_eq!(nav.stats().targets_reached, 1);
        let cmd = nav.tick(0.1, &feed, &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Finished(FinishReason::Complete));
        assert!(nav.is_completed());
    }

    #[tokio::test]
    async fn test_restart_after_completion_explores_again() {
        let mut nav = Navigator::new(NavigatorConfig {
            waypoint_tolerance: 1000.0,
            exploration: ExplorationConfig {
                max_discovery_points: 1,
                discovery_percent: 0.15,
                ..ExplorationConfig::default()
            },
            ..NavigatorConfig::default()
        });
        nav.start(0.0);
        let feed = FixedFeed::sequence(vec![Some(Position2D::new(0.0, 0.0)), Some(Position2D::new(20.0, 0.0))]);
        nav.tick(0.0, &feed, &no_entities(), None).await.unwrap();
        let cmd = nav.tick(0.1, &feed, &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Finished(FinishReason::Complete));

        // 別の場所で再開すると探索記録は空から始まる
        nav.stop();
        nav.start(10.0);
        let cmd = nav.tick(10.0, &FixedFeed::at(900.0, 900.0), &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Idle);
        assert!(nav.is_running());
        assert!(!nav.is_completed());
        assert_eq!(nav.exploration.explored_areas().len(), 1);
    }

    #[tokio::test]
    async fn test_moves_are_spaced_by_movement_delay() {
        let mut nav = Navigator::new(NavigatorConfig {
            movement_delay_s: 0.2,
            movement_jitter_s: 0.0,
            ..NavigatorConfig::default()
        });
        nav.start(0.0);
        let feed = FixedFeed::at(0.0, 0.0);

        let cmd = nav.tick(0.0, &feed, &no_entities(), None).await.unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
        let cmd = nav.tick(0.1, &feed, &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Idle);
        assert_eq!(nav.stats().throttled, 1);
        let cmd = nav.tick(0.25, &feed, &no_entities(), None).await.unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
        assert_eq!(nav.stats().moves, 2);
    }

    #[tokio::test]
    async fn test_movement_jitter_is_bounded() {
        let mut nav = Navigator::new(NavigatorConfig {
            movement_delay_s: 0.2,
            movement_jitter_s: 0.15,
            seed: 9,
            ..NavigatorConfig::default()
        });
        nav.start(0.0);
        let feed = FixedFeed::at(0.0, 0.0);

        assert!(matches!(nav.tick(0.0, &feed, &no_entities(), None).await.unwrap(), NavCommand::Move { .. }));
        assert_eq!(nav.tick(0.19, &feed, &no_entities(), None).await.unwrap(), NavCommand::Idle);
        assert!(matches!(nav.tick(0.36, &feed, &no_entities(), None).await.unwrap(), NavCommand::Move { .. }));
    }

    #[tokio::test]
    async fn test_oscillation_triggers_recovery() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let cycle = [Position2D::new(0.0, 0.0), Position2D::new(6.0, 0.0), Position2D::new(3.0, 4.0)];
        let feed = FixedFeed::sequence((0..6).map(|i| Some(cycle[i % 3])).collect());

        let mut last = NavCommand::Idle;
        for i in 0..6 {
            last = nav.tick(i as f64 * 0.1, &feed, &no_entities(), None).await.unwrap();
        }
        let NavCommand::Recover { waypoint, status } = last else {
            panic!("expected recovery, got {last:?}");
        };
        assert_eq!(status, MotionStatus::Oscillating);
        let d = waypoint.distance(&cycle[2]);
        assert!((10.0 - 1e-9..=20.0 + 1e-9).contains(&d));
        assert_eq!(nav.stats().recoveries, 1);
    }

    #[tokio::test]
    async fn test_stalled_progress_regenerates() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let feed = FixedFeed::at(0.0, 0.0);
        let mut saw_regenerate = false;
        for i in 0..10 {
            let cmd = nav.tick(i as f64 * 0.1, &feed, &no_entities(), None).await.unwrap();
            if cmd == NavCommand::Idle && nav.stats().recoveries > 0 {
                saw_regenerate = true;
            }
        }
        assert!(saw_regenerate);
        assert!(nav.stats().regenerations >= 2);
    }

    #[tokio::test]
    async fn test_route_service_path_is_used() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let service = DetourService { delay_ms: 0 };
        let cmd = nav
            .tick(0.0, &FixedFeed::at(0.0, 0.0), &no_entities(), Some(&service))
            .await
            .unwrap();

        let NavCommand::Move { target, waypoint } = cmd else {
            panic!("expected move, got {cmd:?}");
        };
        // 外部ルートは from → (from.x, target.y) → target
        let expected = [Position2D::new(0.0, target.y), target];
        assert!(expected.contains(&waypoint));
        assert_eq!(nav.stats().route_fallbacks, 0);
        assert!(nav.exploration.discovery_points().contains(&Position2D::new(0.0, 40.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_route_service_falls_back() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let service = DetourService { delay_ms: 10_000 };
        let cmd = nav
            .tick(0.0, &FixedFeed::at(0.0, 0.0), &no_entities(), Some(&service))
            .await
            .unwrap();
        assert!(matches!(cmd, NavCommand::Move { .. }));
        assert_eq!(nav.stats().route_fallbacks, 1);
        assert!(nav.pathfinding.cache_stats().misses >= 1);
    }

    #[tokio::test]
    async fn test_cancel_handle_stops_navigation() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let handle = nav.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());

        let cmd = nav.tick(0.0, &FixedFeed::at(0.0, 0.0), &no_entities(), None).await.unwrap();
        assert_eq!(cmd, NavCommand::Idle);
        assert!(!nav.is_running());

        // 再開時は新しいシグナルになる
        nav.start(1.0);
        assert!(!nav.cancel_handle().is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_area_change_resets_components() {
        let mut nav = Navigator::default();
        nav.start(0.0);
        let feed = FixedFeed::at(0.0, 0.0);
        let entities = Entities(Ok(vec![Entity {
            id: 1,
            position: Position2D::new(3.0, 0.0),
            label: "gate".to_string(),
        }]));
        nav.tick(0.0, &feed, &entities, None).await.unwrap();
        nav.tick(0.1, &feed, &entities, None).await.unwrap();
        assert_eq!(nav.obstacles.handled_count(), 1);
        assert!(nav.pathfinding.cache_stats().entries > 0);

        nav.on_area_change();
        assert_eq!(nav.obstacles.handled_count(), 0);
        assert_eq!(nav.pathfinding.cache_stats().entries, 0);
        assert!(nav.exploration.explored_areas().is_empty());
        assert!(nav.exploration_target().is_none());
        assert!(nav.is_running());
    }
}
