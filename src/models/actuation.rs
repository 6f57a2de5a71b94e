//! # Actuation モジュール
//!
//! 移動・操作リクエストを1スロットのキャンセル可能な遅延タスクとして実行します。
//!
//! 新しいリクエストが来ると未完了のタスクは中断され、ポインタ配置から
//! クリックまでを1つのタスク内で行うため、前のクリックが後のポインタ位置で
//! 発火することはありません。

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::models::{
    common::Position2D,
    error::{NavError, NavResult},
    traits::{EntityId, IActuator},
};

/// アクチュエーションの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    /// ポインタ配置からクリックまでの基本遅延（ミリ秒）
    pub click_delay_ms: u64,
    /// 遅延に加えるランダム幅（ミリ秒）
    pub jitter_ms: u64,
    pub seed: u64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            click_delay_ms: 30,
            jitter_ms: 30,
            seed: 0,
        }
    }
}

/// アクチュエーションリクエスト
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuationRequest {
    /// 指定位置へ移動
    Move(Position2D),
    /// エンティティを操作
    Interact { entity_id: EntityId, position: Position2D },
}

impl ActuationRequest {
    pub fn position(&self) -> Position2D {
        match self {
            ActuationRequest::Move(position) => *position,
            ActuationRequest::Interact { position, .. } => *position,
        }
    }
}

/// タスク番号付きの失敗
type TaskFailure = (u64, NavError);

/// 1スロットのアクチュエーションスケジューラ
///
/// 失敗はタスク番号付きで記録され、`settle` で返したタスクの失敗だけが
/// `drain_failures` の対象から外れます。
pub struct ActuationScheduler {
    pub config: ActuationConfig,
    actuator: Arc<dyn IActuator>,
    pending: Option<(u64, JoinHandle<NavResult<()>>)>,
    failures_tx: mpsc::UnboundedSender<TaskFailure>,
    failures_rx: mpsc::UnboundedReceiver<TaskFailure>,
    unreported: Vec<TaskFailure>,
    rng: ChaCha8Rng,
    submitted: u64,
    replaced: u64,
}

impl ActuationScheduler {
    pub fn new(actuator: Arc<dyn IActuator>, config: ActuationConfig) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            actuator,
            pending: None,
            failures_tx,
            failures_rx,
            unreported: Vec::new(),
            rng,
            submitted: 0,
            replaced: 0,
        }
    }

    /// リクエストの登録
    ///
    /// 未完了のタスクがあれば中断して置き換えます。tokio ランタイム内で呼ぶ必要があります。
    pub fn submit(&mut self, request: ActuationRequest) {
        if self.cancel_pending() {
            self.replaced += 1;
        }

        let delay = self.next_delay();
        let actuator = Arc::clone(&self.actuator);
        let failures = self.failures_tx.clone();

        self.submitted += 1;
        let task_id = self.submitted;
        trace!(?request, task_id, delay_ms = delay.as_millis() as u64, "アクチュエーションを登録");

        let handle = tokio::spawn(async move {
            let result = perform(actuator.as_ref(), request, delay).await;
            if let Err(err) = &result {
                // 受信側が先に破棄されていても問題ない
                let _ = failures.send((task_id, err.clone()));
            }
            result
        });
        self.pending = Some((task_id, handle));
    }

    /// 未完了タスクの中断
    ///
    /// # 戻り値
    ///
    /// 実行中のタスクを中断した場合は true
    pub fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some((_, handle)) if !handle.is_finished() => {
                handle.abort();
                debug!("未完了のアクチュエーションを中断");
                true
            }
            _ => false,
        }
    }

    /// 未完了タスクの完了を待つ
    pub async fn settle(&mut self) -> NavResult<()> {
        let Some((task_id, handle)) = self.pending.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => {
                // このタスクの失敗は戻り値で返す
                self.collect_failures();
                self.unreported.retain(|(id, _)| *id != task_id);
                result
            }
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => Err(NavError::Environment(format!("アクチュエーションタスク異常終了: {join_err}"))),
        }
    }

    /// 完了済みタスクの失敗を取り出す
    pub fn drain_failures(&mut self) -> Vec<NavError> {
        self.collect_failures();
        self.unreported.drain(..).map(|(_, err)| err).collect()
    }

    fn collect_failures(&mut self) {
        while let Ok(failure) = self.failures_rx.try_recv() {
            self.unreported.push(failure);
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|(_, h)| !h.is_finished())
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted
    }

    pub fn replaced_count(&self) -> u64 {
        self.replaced
    }

    fn next_delay(&mut self) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            self.rng.random_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.click_delay_ms + jitter)
    }
}

impl Drop for ActuationScheduler {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}

/// 投影 → ポインタ配置 → 遅延 → クリック
async fn perform(actuator: &dyn IActuator, request: ActuationRequest, delay: Duration) -> NavResult<()> {
    let screen = actuator.project(request.position())?;
    actuator.request_move(screen)?;

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    actuator.request_click(screen).inspect_err(|err| {
        warn!(?request, error = %err, "ACTUATION_REJECTED: クリックが拒否されました");
    })
}
