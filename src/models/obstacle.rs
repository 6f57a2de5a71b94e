use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{
    common::Position2D,
    traits::{Entity, EntityId},
};

/// 障害物カテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObstacleCategory {
    /// ドア/ゲート
    Door,
    /// エリア遷移
    Transition,
}

impl ObstacleCategory {
    /// ラベルがこのカテゴリに該当するか（大文字小文字を区別しない部分一致）
    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        match self {
            ObstacleCategory::Door => label.contains("door") || label.contains("gate"),
            ObstacleCategory::Transition => label.contains("transition"),
        }
    }
}

/// 障害物操作の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    pub auto_open_doors: bool,
    pub auto_use_transitions: bool,
    pub door_detection_radius: f64,
    pub transition_detection_radius: f64,
    /// エリア遷移も操作済みとして記録するか
    pub dedupe_transitions: bool,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            auto_open_doors: true,
            auto_use_transitions: false,
            door_detection_radius: 20.0,
            transition_detection_radius: 25.0,
            dedupe_transitions: true,
        }
    }
}

impl ObstacleConfig {
    pub fn detection_radius(&self, category: ObstacleCategory) -> f64 {
        match category {
            ObstacleCategory::Door => self.door_detection_radius,
            ObstacleCategory::Transition => self.transition_detection_radius,
        }
    }

    pub fn is_enabled(&self, category: ObstacleCategory) -> bool {
        match category {
            ObstacleCategory::Door => self.auto_open_doors,
            ObstacleCategory::Transition => self.auto_use_transitions,
        }
    }
}

/// 操作対象に選ばれた障害物
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleInteraction {
    pub entity_id: EntityId,
    pub position: Position2D,
    pub category: ObstacleCategory,
    pub distance: f64,
}

/// 障害物操作トラッカー
///
/// 一度操作したエンティティを記録し、同じ障害物への再操作を防ぎます。
/// 記録はエリア変更時に `reset` で一括クリアします。
#[derive(Debug)]
pub struct ObstacleInteractionTracker {
    pub config: ObstacleConfig,
    handled: HashSet<EntityId>,
    interaction_count: usize,
}

impl ObstacleInteractionTracker {
    pub fn new(config: ObstacleConfig) -> Self {
        Self {
            config,
            handled: HashSet::new(),
            interaction_count: 0,
        }
    }

    /// 操作対象の選定
    ///
    /// カテゴリ・検知半径・未操作で絞り込み、最も近いエンティティを1つ選びます。
    ///
    /// # 引数
    ///
    /// * `category` - 対象カテゴリ
    /// * `player` - 現在位置
    /// * `entities` - 周辺エンティティ
    ///
    /// # 戻り値
    ///
    /// 操作すべきエンティティ（無ければ None）
    pub fn check(
        &mut self,
        category: ObstacleCategory,
        player: Position2D,
        entities: &[Entity],
    ) -> Option<ObstacleInteraction> {
        let radius = self.config.detection_radius(category);

        let mut nearest: Option<ObstacleInteraction> = None;
        for entity in entities {
            if !category.matches_label(&entity.label) || self.handled.contains(&entity.id) {
                continue;
            }
            let distance = player.distance(&entity.position);
            if distance > radius {
                continue;
            }
            if nearest.as_ref().is_none_or(|n| distance < n.distance) {
                nearest = Some(ObstacleInteraction {
                    entity_id: entity.id,
                    position: entity.position,
                    category,
                    distance,
                });
            }
        }

        let interaction = nearest?;
        if self.should_record(category) {
            self.handled.insert(interaction.entity_id);
        }
        self.interaction_count += 1;

        info!(
            entity_id = interaction.entity_id,
            category = ?category,
            position_x = interaction.position.x,
            position_y = interaction.position.y,
            distance = interaction.distance,
            "OBSTACLE_INTERACTION: 障害物を操作します"
        );

        Some(interaction)
    }

    fn should_record(&self, category: ObstacleCategory) -> bool {
        match category {
            ObstacleCategory::Door => true,
            ObstacleCategory::Transition => self.config.dedupe_transitions,
        }
    }

    pub fn is_handled(&self, id: EntityId) -> bool {
        self.handled.contains(&id)
    }

    pub fn handled_count(&self) -> usize {
        self.handled.len()
    }

    pub fn interaction_count(&self) -> usize {
        self.interaction_count
    }

    /// 操作済み記録をクリア
    pub fn reset(&mut self) {
        self.handled.clear();
    }
}

impl Default for ObstacleInteractionTracker {
    fn default() -> Self {
        Self::new(ObstacleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: EntityId, x: f64, y: f64, label: &str) -> Entity {
        Entity {
            id,
            position: Position2D::new(x, y),
            label: label.to_string(),
        }
    }

    fn world() -> Vec<Entity> {
        vec![
            entity(1, 15.0, 0.0, "Metadata/Terrain/Doors/WoodenDoor"),
            entity(2, 5.0, 5.0, "Metadata/Terrain/IronGate"),
            entity(3, 50.0, 0.0, "Metadata/Terrain/Doors/FarDoor"),
            entity(4, 10.0, 0.0, "Metadata/MiscellaneousObjects/AreaTransition"),
            entity(5, 2.0, 0.0, "Metadata/Monsters/Zombie"),
        ]
    }

    #[test]
    fn test_label_matching() {
        assert!(ObstacleCategory::Door.matches_label("Some/DOOR/thing"));
        assert!(ObstacleCategory::Door.matches_label("castle_gate"));
        assert!(!ObstacleCategory::Door.matches_label("AreaTransition"));
        assert!(ObstacleCategory::Transition.matches_label("AreaTransition"));
    }

    #[test]
    fn test_nearest_door_selected_and_deduplicated() {
        let mut tracker = ObstacleInteractionTracker::default();
        let origin = Position2D::new(0.0, 0.0);

        let first = tracker.check(ObstacleCategory::Door, origin, &world()).unwrap();
        assert_eq!(first.entity_id, 2);
        let second = tracker.check(ObstacleCategory::Door, origin, &world()).unwrap();
        assert_eq!(second.entity_id, 1);
        // 3 は検知半径外
        assert!(tracker.check(ObstacleCategory::Door, origin, &world()).is_none());
        assert_eq!(tracker.handled_count(), 2);
    }

    #[test]
    fn test_transition_dedup_policy() {
        let origin = Position2D::new(0.0, 0.0);

        let mut dedupe = ObstacleInteractionTracker::default();
        assert!(dedupe.check(ObstacleCategory::Transition, origin, &world()).is_some());
        assert!(dedupe.check(ObstacleCategory::Transition, origin, &world()).is_none());

        let mut repeat = ObstacleInteractionTracker::new(ObstacleConfig {
            dedupe_transitions: false,
            ..ObstacleConfig::default()
        });
        assert!(repeat.check(ObstacleCategory::Transition, origin, &world()).is_some());
        assert!(repeat.check(ObstacleCategory::Transition, origin, &world()).is_some());
        assert_eq!(repeat.handled_count(), 0);
        assert_eq!(repeat.interaction_count(), 2);
    }

    #[test]
    fn test_reset_allows_reinteraction() {
        let mut tracker = ObstacleInteractionTracker::default();
        let origin = Position2D::new(0.0, 0.0);
        tracker.check(ObstacleCategory::Door, origin, &world());
        assert!(tracker.is_handled(2));
        tracker.reset();
        assert!(!tracker.is_handled(2));
        assert_eq!(tracker.check(ObstacleCategory::Door, origin, &world()).unwrap().entity_id, 2);
    }

    #[test]
    fn test_empty_entity_list() {
        let mut tracker = ObstacleInteractionTracker::default();
        assert!(tracker.check(ObstacleCategory::Door, Position2D::new(0.0, 0.0), &[]).is_none());
        assert_eq!(tracker.interaction_count(), 0);
    }
}
