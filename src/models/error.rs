use thiserror::Error;

/// ナビゲーション処理のエラー
///
/// すべて1ティック内で完結する局所的なエラーであり、プロセスを停止させるものはありません。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    /// 環境フィードがまだ準備できていない（このティックはスキップ）
    #[error("フィード利用不可: {0}")]
    Unavailable(String),

    /// 入力値が不正（NaN座標など）
    #[error("不正な入力: {0}")]
    InvalidInput(String),

    /// 環境側でアクチュエーションが拒否された（自動リトライしない）
    #[error("環境エラー: {0}")]
    Environment(String),

    /// ルート探索がキャンセルまたはタイムアウトした
    #[error("キャンセルされました: {0}")]
    Cancelled(String),
}

impl NavError {
    /// このティックをスキップすれば回復するエラーかどうか
    pub fn is_transient(&self) -> bool {
        matches!(self, NavError::Unavailable(_) | NavError::Cancelled(_))
    }
}

pub type NavResult<T> = std::result::Result<T, NavError>;
