//! # 配信キュー
//!
//! 単発送信とキャンペーンをプロセス内で非同期に実行する、単一コンシューマのキュー。
//!
//! ## 設計方針
//!
//! - **取り出し順**: 遅延時間を過ぎたタスクのうち優先度の高いものから、同じ優先度なら投入順
//! - **排出ループは 1 つだけ**: 最初の投入でループを起動し、実行中の投入はループを起こすだけにする。
//!   キューが空になったらループは終了する
//! - **タスクの隔離**: 各タスクは別の tokio タスクで実行し、`Err` もパニックも `failed` として数えて
//!   次のタスクに進む
//! - **永続化しない**: プロセスが生きている間だけ少なくとも 1 回の実行を保証する
//!
//! 状態は短い `std::sync::Mutex` の臨界区間で扱い、待機は `Notify`（新規投入）と
//! `watch`（アイドル通知）で行う。

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use renthub_domain::delivery::DeliveryRequest;
use renthub_shared::{event_log::event, log_business_event};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Notify, watch},
    time::Instant,
};

use super::{
    campaign::{BatchCampaignRunner, CampaignJob},
    notification::{SingleSender, retry::saturating_millis},
};
use crate::error::NotifierError;

/// キューに積むタスク
#[derive(Debug, Clone)]
pub enum DeliveryTask {
    Single(DeliveryRequest),
    Campaign(CampaignJob),
}

impl DeliveryTask {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::Campaign(_) => "campaign",
        }
    }
}

/// 投入オプション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// 実行可能になるまでの遅延
    pub delay:    Duration,
    /// 大きいほど先に実行する
    pub priority: i32,
}

/// タスク ID（プロセス内の投入順の連番）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 投入したタスクの控え
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub id:   TaskId,
    pub kind: &'static str,
}

/// キューの状態ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting:   usize,
    pub delayed:   usize,
    pub active:    usize,
    pub completed: u64,
    pub failed:    u64,
}

/// タスクの実行者
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: DeliveryTask) -> Result<(), NotifierError>;
}

/// 単発送信とキャンペーンを振り分ける実行者
pub struct DeliveryDispatcher {
    sender:    SingleSender,
    campaigns: BatchCampaignRunner,
}

impl DeliveryDispatcher {
    pub fn new(sender: SingleSender, campaigns: BatchCampaignRunner) -> Self {
        Self { sender, campaigns }
    }
}

#[async_trait]
impl TaskHandler for DeliveryDispatcher {
    async fn handle(&self, task: DeliveryTask) -> Result<(), NotifierError> {
        match task {
            DeliveryTask::Single(request) => {
                let outcome = self.sender.send(request).await?;
                if outcome.success {
                    Ok(())
                } else {
                    Err(NotifierError::DeliveryFailed(
                        outcome.error.unwrap_or_default(),
                    ))
                }
            }
            DeliveryTask::Campaign(job) => self.campaigns.run(job).await.map(|_| ()),
        }
    }
}

struct Pending {
    id:       TaskId,
    priority: i32,
    ready_at: Instant,
    task:     DeliveryTask,
}

#[derive(Default)]
struct State {
    /// 投入順に並ぶ
    pending:   Vec<Pending>,
    active:    usize,
    completed: u64,
    failed:    u64,
    draining:  bool,
    last_id:   u64,
}

enum Next {
    Run(Pending),
    WaitUntil(Instant),
    Empty,
}

impl State {
    fn take_next(&mut self, now: Instant) -> Next {
        let ready = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.ready_at <= now)
            // 同じ優先度では先に投入したもの（index が小さいもの）を選ぶ
            .max_by_key(|(index, p)| (p.priority, std::cmp::Reverse(*index)))
            .map(|(index, _)| index);

        if let Some(index) = ready {
            return Next::Run(self.pending.remove(index));
        }
        match self.pending.iter().map(|p| p.ready_at).min() {
            Some(at) => Next::WaitUntil(at),
            None => Next::Empty,
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active == 0
    }
}

struct Inner {
    state:   Mutex<State>,
    handler: Arc<dyn TaskHandler>,
    wake:    Notify,
    idle:    watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// プロセス内の配信キュー
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                handler,
                wake: Notify::new(),
                idle,
            }),
        }
    }

    /// タスクを投入する
    ///
    /// tokio ランタイム上で呼ぶこと。ブロックも失敗もしない。
    pub fn enqueue(&self, task: DeliveryTask, options: EnqueueOptions) -> TaskHandle {
        let kind = task.kind();
        let (handle, start_drain) = {
            let mut state = self.inner.lock();
            state.last_id += 1;
            let id = TaskId(state.last_id);
            state.pending.push(Pending {
                id,
                priority: options.priority,
                ready_at: Instant::now() + options.delay,
                task,
            });
            self.inner.idle.send_replace(false);
            let start_drain = !state.draining;
            state.draining = true;
            (TaskHandle { id, kind }, start_drain)
        };

        log_business_event!(
            event.category = event::category::QUEUE,
            event.action = event::action::TASK_ENQUEUED,
            event.entity_type = event::entity_type::QUEUE_TASK,
            event.entity_id = %handle.id,
            event.result = event::result::SUCCESS,
            queue.kind = kind,
            queue.priority = options.priority,
            queue.delay_ms = saturating_millis(options.delay),
            "タスクを投入"
        );

        if start_drain {
            tokio::spawn(Self::drain(self.inner.clone()));
        } else {
            self.inner.wake.notify_one();
        }
        handle
    }

    /// まだ実行されていないタスクを取り消す
    ///
    /// 実行中・実行済み・存在しないタスクの場合は `false`。
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            let before = state.pending.len();
            state.pending.retain(|p| p.id != id);
            let removed = state.pending.len() < before;
            if state.is_idle() {
                self.inner.idle.send_replace(true);
            }
            removed
        };

        if removed {
            log_business_event!(
                event.category = event::category::QUEUE,
                event.action = event::action::TASK_CANCELLED,
                event.entity_type = event::entity_type::QUEUE_TASK,
                event.entity_id = %id,
                event.result = event::result::SUCCESS,
                "タスクを取り消し"
            );
            self.inner.wake.notify_one();
        }
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        let now = Instant::now();
        let delayed = state.pending.iter().filter(|p| p.ready_at > now).count();
        QueueStats {
            waiting: state.pending.len() - delayed,
            delayed,
            active: state.active,
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// 待機中・実行中のタスクがなくなるまで待つ
    pub async fn wait_until_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // 送信側は self が持っているので閉じることはない
        let _ = idle.wait_for(|idle| *idle).await;
    }

    async fn drain(inner: Arc<Inner>) {
        loop {
            let next = {
                let mut state = inner.lock();
                match state.take_next(Instant::now()) {
                    Next::Run(pending) => {
                        state.active += 1;
                        Next::Run(pending)
                    }
                    Next::Empty => {
                        state.draining = false;
                        if state.is_idle() {
                            inner.idle.send_replace(true);
                        }
                        return;
                    }
                    wait => wait,
                }
            };

            match next {
                Next::Run(pending) => Self::run_one(&inner, pending).await,
                Next::WaitUntil(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = inner.wake.notified() => {}
                    }
                }
                Next::Empty => return,
            }
        }
    }

    async fn run_one(inner: &Arc<Inner>, pending: Pending) {
        let Pending { id, task, .. } = pending;
        let kind = task.kind();
        let handler = inner.handler.clone();
        let joined = tokio::spawn(async move { handler.handle(task).await }).await;

        let error = match joined {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("タスクが異常終了しました: {e}")),
        };

        {
            let mut state = inner.lock();
            state.active -= 1;
            match error {
                None => state.completed += 1,
                Some(_) => state.failed += 1,
            }
        }

        match error {
            None => log_business_event!(
                event.category = event::category::QUEUE,
                event.action = event::action::TASK_COMPLETED,
                event.entity_type = event::entity_type::QUEUE_TASK,
                event.entity_id = %id,
                event.result = event::result::SUCCESS,
                queue.kind = kind,
                "タスク完了"
            ),
            Some(error) => log_business_event!(
                event.category = event::category::QUEUE,
                event.action = event::action::TASK_FAILED,
                event.entity_type = event::entity_type::QUEUE_TASK,
                event.entity_id = %id,
                event.result = event::result::FAILURE,
                queue.kind = kind,
                error = %error,
                "タスク失敗"
            ),
        }
    }
}
