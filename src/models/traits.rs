use std::future::Future;
use std::pin::Pin;

use crate::models::common::*;
use crate::models::error::NavResult;

/// エンティティ識別子
pub type EntityId = u64;

/// 環境から取得したエンティティ（ドア、エリア遷移など）
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub position: Position2D,
    /// パス/カテゴリラベル（部分一致でカテゴリ判定に使用）
    pub label: String,
}

/// 外部ルートサービスが返す非同期結果
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = NavResult<Vec<Position2D>>> + Send + 'a>>;

/// 自己位置フィードのインターフェース
pub trait IPositionFeed {
    /// 現在位置の取得（取得できない場合は None）
    fn current_position(&self) -> Option<Position2D>;
}

/// 周辺エンティティフィードのインターフェース
pub trait IEntityFeed {
    /// `center` から `radius` 以内のエンティティ一覧
    fn nearby_entities(&self, center: Position2D, radius: f64) -> NavResult<Vec<Entity>>;
}

/// アクチュエーション（ポインタ操作）のインターフェース
///
/// コアは「どこに・いつ」だけを決め、「どうやって」は実装側に任せます。
pub trait IActuator: Send + Sync {
    /// ワールド座標を画面座標へ投影
    fn project(&self, position: Position2D) -> NavResult<ScreenPoint>;

    /// ポインタ移動
    fn request_move(&self, point: ScreenPoint) -> NavResult<()>;

    /// クリック
    fn request_click(&self, point: ScreenPoint) -> NavResult<()>;
}

/// 外部ルートサービスのインターフェース（任意）
pub trait IRouteService: Send + Sync {
    /// `from` から `target` までのウェイポイント列を非同期に計算
    fn lookup_route<'a>(&'a self, from: Position2D, target: Position2D) -> RouteFuture<'a>;

    /// 指定カテゴリのクラスタ中心位置
    fn cluster_by_category(&self, _category: &str, _radius: f64) -> Vec<Position2D> {
        Vec::new()
    }
}
