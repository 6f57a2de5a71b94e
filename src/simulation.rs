//! # Simulation モジュール
//!
//! ナビゲーターを閉ループで検証するためのシミュレーションエンジンを提供します。
//!
//! 簡易的な2次元ワールド（自己位置・エンティティ・クリックによる移動）を
//! 外部環境として用意し、固定時間刻み（Δt）でナビゲーターを駆動します。
//! ナビゲーターの決定はアクチュエーションスケジューラ経由でワールドへ
//! 反映されます。
//!
//! ## シミュレーション処理順序
//!
//! 各時間刻みにおいて、以下の順序で処理が実行されます：
//!
//! 1. **ワールド更新**: 移動目標へ向けてエージェントを移動
//! 2. **エリア変更処理**: 遷移が発生していればナビゲーターをリセット
//! 3. **ナビゲーター処理**: 1ティック分の判定
//! 4. **アクチュエーション**: 決定をポインタ配置・クリックとして実行
//!
//! ## 使用例
//!
//! ```no_run
//! use autonav::simulation::SimulationEngine;
//! use autonav::scenario::ScenarioConfig;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScenarioConfig::from_file("scenarios/basic_exploration.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let report = engine.run().await?;
//! report.print_summary();
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::models::*;
use crate::scenario::*;
use tracing::{debug, info, trace, warn};

/// クリック位置とエンティティを同一視する距離
const CLICK_TOLERANCE: f64 = 3.0;
/// エンティティを操作できる距離
const INTERACTION_REACH: f64 = 30.0;

/// シミュレーション上のワールド状態
#[derive(Debug)]
pub struct SimWorld {
    pub agent: Position2D,
    pub move_goal: Option<Position2D>,
    pub region: RegionRect,
    pub speed: f64,
    pub projection_scale: f64,
    pub entities: Vec<Entity>,
    pub transition_destination: Option<Position2D>,
    pub pointer: Option<ScreenPoint>,
    pub opened_doors: HashSet<EntityId>,
    pub area_changes: u32,
    pub distance_travelled: f64,
    pub clicks: u64,
    position_dropout_every: u32,
    position_reads: u32,
    area_change_pending: bool,
}

impl SimWorld {
    pub fn from_config(config: &WorldConfig) -> Self {
        Self {
            agent: config.start,
            move_goal: None,
            region: config.region_rect.clone(),
            speed: config.speed,
            projection_scale: config.projection_scale,
            entities: config
                .entities
                .iter()
                .map(|e| Entity {
                    id: e.id,
                    position: e.position,
                    label: e.label.clone(),
                })
                .collect(),
            transition_destination: config.transition_destination,
            pointer: None,
            opened_doors: HashSet::new(),
            area_changes: 0,
            distance_travelled: 0.0,
            clicks: 0,
            position_dropout_every: config.position_dropout_every,
            position_reads: 0,
            area_change_pending: false,
        }
    }

    /// 移動目標へ向けて dt 秒分移動
    pub fn advance(&mut self, dt: f64) {
        let Some(goal) = self.move_goal else {
            return;
        };

        let reach = self.speed * dt;
        let remaining = self.agent.distance(&goal);
        let next = if remaining <= reach {
            self.move_goal = None;
            goal
        } else {
            self.agent + (goal - self.agent).normalize() * reach
        };

        let next = self.region.clamp(next);
        self.distance_travelled += self.agent.distance(&next);
        self.agent = next;
    }

    /// 保留中のエリア変更を取り出す
    pub fn take_area_change(&mut self) -> bool {
        std::mem::take(&mut self.area_change_pending)
    }

    fn read_position(&mut self) -> Option<Position2D> {
        self.position_reads += 1;
        if self.position_dropout_every > 0 && self.position_reads % self.position_dropout_every == 0 {
            return None;
        }
        Some(self.agent)
    }

    fn click(&mut self, point: ScreenPoint) {
        self.clicks += 1;
        let world = Position2D::new(point.x / self.projection_scale, point.y / self.projection_scale);

        let clicked = self
            .entities
            .iter()
            .position(|e| e.position.distance(&world) <= CLICK_TOLERANCE);

        if let Some(index) = clicked {
            let entity = &self.entities[index];
            if entity.position.distance(&self.agent) <= INTERACTION_REACH {
                if ObstacleCategory::Door.matches_label(&entity.label) {
                    let door = self.entities.remove(index);
                    info!(entity_id = door.id, "DOOR_OPENED: ドアを開けました");
                    self.opened_doors.insert(door.id);
                    return;
                }
                if ObstacleCategory::Transition.matches_label(&entity.label) {
                    if let Some(destination) = self.transition_destination {
                        info!(
                            entity_id = entity.id,
                            destination = %destination,
                            "AREA_TRANSITION: エリアを移動しました"
                        );
                        self.agent = destination;
                        self.move_goal = None;
                        self.area_changes += 1;
                        self.area_change_pending = true;
                    }
                    return;
                }
            }
        }

        self.move_goal = Some(self.region.clamp(world));
    }
}

/// ナビゲーターとスケジューラから共有されるワールド
#[derive(Debug, Clone)]
pub struct SharedWorld(Arc<Mutex<SimWorld>>);

impl SharedWorld {
    pub fn new(world: SimWorld) -> Self {
        Self(Arc::new(Mutex::new(world)))
    }

    pub fn lock(&self) -> NavResult<MutexGuard<'_, SimWorld>> {
        self.0
            .lock()
            .map_err(|_| NavError::Environment("ワールドのロックが破損しています".to_string()))
    }
}

impl IPositionFeed for SharedWorld {
    fn current_position(&self) -> Option<Position2D> {
        self.lock().ok()?.read_position()
    }
}

impl IEntityFeed for SharedWorld {
    fn nearby_entities(&self, center: Position2D, radius: f64) -> NavResult<Vec<Entity>> {
        let world = self.lock()?;
        Ok(world
            .entities
            .iter()
            .filter(|e| e.position.distance(&center) <= radius)
            .cloned()
            .collect())
    }
}

impl IActuator for SharedWorld {
    fn project(&self, position: Position2D) -> NavResult<ScreenPoint> {
        if !position.is_finite() {
            return Err(NavError::InvalidInput(format!("投影できない座標: {position:?}")));
        }
        let world = self.lock()?;
        Ok(ScreenPoint::new(
            position.x * world.projection_scale,
            position.y * world.projection_scale,
        ))
    }

    fn request_move(&self, point: ScreenPoint) -> NavResult<()> {
        self.lock()?.pointer = Some(point);
        Ok(())
    }

    fn request_click(&self, point: ScreenPoint) -> NavResult<()> {
        let mut world = self.lock()?;
        if world.pointer != Some(point) {
            return Err(NavError::Environment("ポインタ位置とクリック位置が一致しません".to_string()));
        }
        world.click(point);
        Ok(())
    }
}

/// シミュレーション用の外部ルートサービス
///
/// 軸に沿ったL字経路を返し、設定に応じて遅延・失敗を挟みます。
#[derive(Debug)]
pub struct SimRouteService {
    config: RouteServiceConfig,
    calls: AtomicU32,
}

impl SimRouteService {
    pub fn new(config: RouteServiceConfig) -> Self {
        Self {
            config,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl IRouteService for SimRouteService {
    fn lookup_route<'a>(&'a self, from: Position2D, target: Position2D) -> RouteFuture<'a> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        Box::pin(async move {
            if self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
            if self.config.fail_every > 0 && call % self.config.fail_every == 0 {
                return Err(NavError::Unavailable(format!("ルートサービス応答なし (call {call})")));
            }
            let corner = Position2D::new(target.x, from.y);
            Ok(vec![from, corner, target])
        })
    }

    fn cluster_by_category(&self, _category: &str, _radius: f64) -> Vec<Position2D> {
        self.config.cluster_points.clone()
    }
}

/// シミュレーション結果
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub finish_reason: Option<FinishReason>,
    pub elapsed_s: f64,
    pub steps: u64,
    pub coverage: f64,
    pub explored_areas: usize,
    pub distance_travelled: f64,
    pub doors_opened: usize,
    pub area_changes: u32,
    pub skipped_ticks: u64,
    pub actuation_failures: u64,
    pub navigator: NavigatorStats,
}

impl SimulationReport {
    pub fn print_summary(&self) {
        println!("=== シミュレーション結果 ===");
        match self.finish_reason {
            Some(FinishReason::Complete) => println!("終了理由: 探索完了"),
            Some(FinishReason::Timeout) => println!("終了理由: 最大実行時間超過"),
            None => println!("終了理由: シミュレーション時間上限"),
        }
        println!("経過時間: {:.1}秒 ({}ステップ)", self.elapsed_s, self.steps);
        println!("カバレッジ: {:.1}%", self.coverage * 100.0);
        println!("探索済み記録: {}", self.explored_areas);
        println!("移動距離: {:.1}", self.distance_travelled);
        println!("開いたドア: {}", self.doors_opened);
        println!("エリア移動: {}回", self.area_changes);
        println!(
            "移動指示: {} / 回復行動: {} / 再生成: {}",
            self.navigator.moves, self.navigator.recoveries, self.navigator.regenerations
        );
        println!(
            "スキップ: {}ティック / アクチュエーション失敗: {}",
            self.skipped_ticks, self.actuation_failures
        );
    }
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub seed: u64,
    pub step_count: u64,

    pub world: SharedWorld,
    pub navigator: Navigator,
    scheduler: ActuationScheduler,
    route_service: Option<SimRouteService>,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,

    skipped_ticks: u64,
    actuation_failures: u64,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let dt = scenario.sim.dt_s;
        let max_time = scenario.sim.t_max_s;
        let seed = scenario.sim.seed;

        // 乱数系列はシナリオのシードから決める
        let mut nav_config = scenario.navigator.clone();
        nav_config.exploration.seed = seed;
        nav_config.stuck.seed = seed.wrapping_add(1);
        nav_config.actuation.seed = seed.wrapping_add(2);
        nav_config.seed = seed.wrapping_add(3);

        let world = SharedWorld::new(SimWorld::from_config(&scenario.world));
        let actuator: Arc<dyn IActuator> = Arc::new(world.clone());
        let scheduler = ActuationScheduler::new(actuator, nav_config.actuation.clone());
        let route_service = scenario
            .world
            .route_service
            .enabled
            .then(|| SimRouteService::new(scenario.world.route_service.clone()));

        Self {
            current_time: 0.0,
            dt,
            max_time,
            seed,
            step_count: 0,
            world,
            navigator: Navigator::new(nav_config),
            scheduler,
            route_service,
            scenario_config: scenario,
            verbose_level,
            skipped_ticks: 0,
            actuation_failures: 0,
        }
    }

    pub fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        self.navigator.start(self.current_time);

        if self.verbose_level > 0 {
            let world = self.world.lock()?;
            info!("初期化完了:");
            info!("  開始位置: {}", world.agent);
            info!("  エンティティ: {}個", world.entities.len());
            info!(
                "  ルートサービス: {}",
                if self.route_service.is_some() { "有効" } else { "無効" }
            );
        }

        Ok(())
    }

    pub async fn run(&mut self) -> Result<SimulationReport, Box<dyn std::error::Error>> {
        info!("=== シミュレーション実行開始 ===");

        let mut finish_reason = None;
        while self.current_time < self.max_time {
            if let Some(reason) = self.step().await? {
                finish_reason = Some(reason);
                break;
            }

            if self.verbose_level > 2 {
                trace!("時刻: {:.1}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % 100 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒) カバレッジ: {:.1}%",
                    progress,
                    self.current_time,
                    self.max_time,
                    self.navigator.exploration.coverage_ratio() * 100.0
                );
            }
        }

        self.scheduler.cancel_pending();
        self.navigator.stop();

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);

        self.report(finish_reason)
    }

    async fn step(&mut self) -> Result<Option<FinishReason>, Box<dyn std::error::Error>> {
        let area_changed = {
            let mut world = self.world.lock()?;
            world.advance(self.dt);
            world.take_area_change()
        };
        if area_changed {
            self.navigator.on_area_change();
        }

        let route_service = self.route_service.as_ref().map(|s| s as &dyn IRouteService);
        let decision = self
            .navigator
            .tick(self.current_time, &self.world, &self.world, route_service)
            .await;

        let mut finished = None;
        match decision {
            Ok(NavCommand::Finished(reason)) => finished = Some(reason),
            Ok(command) => {
                if let Some(request) = command.actuation() {
                    self.actuate(request).await;
                }
            }
            Err(err) if err.is_transient() => {
                debug!(error = %err, "ティックをスキップ");
                self.skipped_ticks += 1;
            }
            Err(err) => {
                warn!(error = %err, "ナビゲーション判定に失敗しました");
                self.skipped_ticks += 1;
            }
        }

        self.current_time += self.dt;
        self.step_count += 1;

        Ok(finished)
    }

    async fn actuate(&mut self, request: ActuationRequest) {
        self.scheduler.submit(request);
        if let Err(err) = self.scheduler.settle().await {
            warn!(?request, error = %err, "アクチュエーションに失敗しました");
            self.actuation_failures += 1;
        }
        self.actuation_failures += self.scheduler.drain_failures().len() as u64;
    }

    fn report(&self, finish_reason: Option<FinishReason>) -> Result<SimulationReport, Box<dyn std::error::Error>> {
        let world = self.world.lock()?;
        Ok(SimulationReport {
            finish_reason,
            elapsed_s: self.current_time,
            steps: self.step_count,
            coverage: self.navigator.exploration.coverage_ratio(),
            explored_areas: self.navigator.exploration.explored_areas().len(),
            distance_travelled: world.distance_travelled,
            doors_opened: world.opened_doors.len(),
            area_changes: world.area_changes,
            skipped_ticks: self.skipped_ticks,
            actuation_failures: self.actuation_failures,
            navigator: self.navigator.stats(),
        })
    }

    pub fn route_service_calls(&self) -> u32 {
        self.route_service.as_ref().map_or(0, SimRouteService::call_count)
    }
}
