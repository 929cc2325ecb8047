//! 批量导入编排器
//!
//! 导入任务在服务端长时间运行，客户端只负责观察进度：
//! 优先订阅推送通道(SSE)，宽限期内没有数据就退回轮询。
//! 两条通道互斥，谁先送达真实数据谁生效；终态通知只上报一次。
//!
//! 状态机：Idle → Submitting → AwaitingProgress → {Streaming | Polling}
//! → Completed，任何非终态都可进入 Failed。

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{require_session, ApiError, FuzeClient, ImportSnapshot, ImportStatus};
use crate::local_bookmarks::LocalBookmark;
use crate::settings::{Session, Settings};
use crate::sse::{self, StreamEvent};

/// 单次提交的书签数量上限，超过时由用户决定取舍
pub const IMPORT_CEILING: usize = 1000;

/// 监控参数（引用值：宽限3秒，轮询5秒，安全超时600秒）
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub stream_grace: Duration,
    pub poll_interval: Duration,
    pub safety_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stream_grace: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
            safety_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    Submitting,
    AwaitingProgress,
    Streaming,
    Polling,
    Completed,
    Failed,
}

/// 编排器对外发布的事件
#[derive(Debug, Clone)]
pub enum ImportEvent {
    PhaseChanged(ImportPhase),
    Progress(ImportSnapshot),
    Completed(ImportSnapshot),
    Failed {
        reason: String,
        in_flight: Option<ImportSnapshot>,
    },
}

/// 超出上限时的用户选择，在提交之前做出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportLimit {
    /// 只导入前1000条，保持原始遍历顺序
    FirstN,
    All,
}

pub fn apply_ceiling(mut entries: Vec<LocalBookmark>, choice: ImportLimit) -> Vec<LocalBookmark> {
    if choice == ImportLimit::FirstN && entries.len() > IMPORT_CEILING {
        entries.truncate(IMPORT_CEILING);
    }
    entries
}

/// 进度快照的单调过滤与一次性终态控制。
///
/// 轮询路径上的快照可能乱序到达：processed 低于已应用值的非终态快照
/// 直接丢弃；终态快照始终生效，且只生效一次。
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_applied: Option<u64>,
    finished: bool,
}

#[derive(Debug)]
pub enum TrackerVerdict {
    Apply(ImportSnapshot),
    Drop,
    Terminal(ImportSnapshot),
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, snapshot: ImportSnapshot) -> TrackerVerdict {
        if self.finished {
            return TrackerVerdict::Drop;
        }
        if snapshot.is_terminal() {
            self.finished = true;
            return TrackerVerdict::Terminal(snapshot);
        }
        match self.last_applied {
            Some(last) if snapshot.processed < last => TrackerVerdict::Drop,
            _ => {
                self.last_applied = Some(snapshot.processed);
                TrackerVerdict::Apply(snapshot)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveChannel {
    None,
    Stream,
    Poll,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamFailureAction {
    /// 推送通道已是生效通道，监控随之失败
    Fail,
    /// 推送通道尚未生效，立即启动轮询
    StartPolling,
    /// 轮询已经在跑，失败只记日志
    Ignore,
}

/// 双通道互斥标志。
///
/// 宽限期内两条通道可以短暂并存，但启动备用通道前必须先查这个标志，
/// 不能只依赖定时器取消（定时器会和标志位赛跑）。
#[derive(Debug, Default)]
pub struct ChannelGate {
    active: ActiveChannel,
    polling: bool,
}

impl Default for ActiveChannel {
    fn default() -> Self {
        ActiveChannel::None
    }
}

impl ChannelGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> ActiveChannel {
        self.active
    }

    pub fn polling(&self) -> bool {
        self.polling
    }

    /// 宽限期是否仍在等待推送数据
    pub fn awaiting_grace(&self) -> bool {
        self.active == ActiveChannel::None && !self.polling
    }

    /// 宽限到期：只有第一次调用会启动轮询
    pub fn should_start_polling(&mut self) -> bool {
        if self.active == ActiveChannel::None && !self.polling {
            self.polling = true;
            true
        } else {
            false
        }
    }

    /// 推送通道送达真实数据：夺取通道并压制后续轮询。
    /// 返回轮询是否因此被停掉。
    pub fn on_stream_data(&mut self) -> bool {
        let was_polling = self.polling;
        self.polling = false;
        self.active = ActiveChannel::Stream;
        was_polling
    }

    /// 轮询取得快照：推送已生效则丢弃，否则轮询成为生效通道
    pub fn on_poll_result(&mut self) -> bool {
        if self.active == ActiveChannel::Stream {
            return false;
        }
        if self.active == ActiveChannel::None {
            self.active = ActiveChannel::Poll;
        }
        true
    }

    pub fn on_stream_failure(&mut self) -> StreamFailureAction {
        if self.active == ActiveChannel::Stream {
            StreamFailureAction::Fail
        } else if !self.polling {
            self.polling = true;
            StreamFailureAction::StartPolling
        } else {
            StreamFailureAction::Ignore
        }
    }

    /// 推送通道关闭但任务未见终态：转由轮询续接。
    /// 返回是否需要新启动轮询。
    pub fn on_stream_closed(&mut self) -> bool {
        if self.active == ActiveChannel::Stream {
            self.active = ActiveChannel::Poll;
            if !self.polling {
                self.polling = true;
                return true;
            }
        }
        false
    }
}

pub struct ImportOrchestrator {
    client: FuzeClient,
    config: MonitorConfig,
    events: mpsc::Sender<ImportEvent>,
    phase: ImportPhase,
}

impl ImportOrchestrator {
    pub fn new(client: FuzeClient, events: mpsc::Sender<ImportEvent>) -> Self {
        Self::with_config(client, events, MonitorConfig::default())
    }

    pub fn with_config(
        client: FuzeClient,
        events: mpsc::Sender<ImportEvent>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            client,
            config,
            events,
            phase: ImportPhase::Idle,
        }
    }

    pub fn phase(&self) -> &ImportPhase {
        &self.phase
    }

    /// 执行一次完整的导入：前置检查、提交、监控直到终态。
    /// 上限取舍已在调用前完成，entries 即最终提交内容。
    pub async fn run(&mut self, entries: Vec<LocalBookmark>, settings: &Settings) {
        // 前置条件不满足时不发任何网络请求
        let session = match require_session(settings) {
            Ok(session) => session,
            Err(e) => {
                self.fail(&e.to_string(), None).await;
                return;
            }
        };

        self.set_phase(ImportPhase::Submitting).await;
        info!("🚀 Submitting import of {} bookmarks", entries.len());

        if !self.client.health(&session.api_url).await {
            self.fail(
                "Could not connect to Fuze. Please check your API URL and server status.",
                None,
            )
            .await;
            return;
        }

        // 同一账号已有任务在跑就不再提交第二个
        match self.client.fetch_progress(&session).await {
            Ok(snapshot) if snapshot.is_active() => {
                warn!(
                    "⚠️  An import is already running: {}/{} processed",
                    snapshot.processed, snapshot.total
                );
                let reason = ApiError::ImportAlreadyInProgress(snapshot.clone()).to_string();
                self.fail(&reason, Some(snapshot)).await;
                return;
            }
            Ok(_) => {}
            Err(e) => debug!("Progress pre-check unavailable: {}", e),
        }

        // 提交本身不等待：任务结果只通过进度通道观察
        let submit_client = self.client.clone();
        let submit_session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = submit_client.start_import(&entries, &submit_session).await {
                warn!("⚠️  Import submission reported an error: {}", e);
            }
        });

        self.set_phase(ImportPhase::AwaitingProgress).await;
        self.monitor(&session).await;
    }

    async fn monitor(&mut self, session: &Session) {
        let (stream_tx, mut stream_rx) = mpsc::channel(16);
        let stream_task =
            sse::spawn_progress_stream(self.client.handle(), session.clone(), stream_tx);

        let mut tracker = ProgressTracker::new();
        let mut gate = ChannelGate::new();
        let mut stream_done = false;

        let grace = tokio::time::sleep(self.config.stream_grace);
        tokio::pin!(grace);
        let deadline = tokio::time::sleep(self.config.safety_timeout);
        tokio::pin!(deadline);

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.fail(&ApiError::MonitoringTimedOut.to_string(), None).await;
                    break;
                }

                event = stream_rx.recv(), if !stream_done => match event {
                    Some(StreamEvent::Opened) => {
                        // 通道已开，但数据可能仍要等；宽限期继续计时
                        if !gate.polling() && self.phase != ImportPhase::Streaming {
                            self.set_phase(ImportPhase::Streaming).await;
                        }
                    }
                    Some(StreamEvent::Snapshot(snapshot)) => {
                        if gate.on_stream_data() {
                            info!("📡 Push channel took over, polling stopped");
                        }
                        if self.phase != ImportPhase::Streaming {
                            self.set_phase(ImportPhase::Streaming).await;
                        }
                        if self.handle_snapshot(&mut tracker, snapshot).await {
                            break;
                        }
                    }
                    Some(StreamEvent::Error(message)) => {
                        match gate.on_stream_failure() {
                            StreamFailureAction::Fail => {
                                self.fail(&format!("Progress stream failed: {}", message), None)
                                    .await;
                                break;
                            }
                            StreamFailureAction::StartPolling => {
                                debug!("Push channel unavailable ({}), polling instead", message);
                                self.set_phase(ImportPhase::Polling).await;
                            }
                            StreamFailureAction::Ignore => {
                                debug!("Push channel failed after fallback: {}", message);
                            }
                        }
                    }
                    Some(StreamEvent::Closed) => {
                        if gate.active() == ActiveChannel::Stream {
                            // 流在终态之前断开：先补拉一次快照核对
                            match self.client.fetch_progress(session).await {
                                Ok(snapshot) => {
                                    if self.handle_snapshot(&mut tracker, snapshot).await {
                                        break;
                                    }
                                }
                                Err(e) => debug!("Reconcile fetch after close failed: {}", e),
                            }
                            if gate.on_stream_closed() {
                                self.set_phase(ImportPhase::Polling).await;
                            }
                        }
                    }
                    None => {
                        stream_done = true;
                    }
                },

                _ = &mut grace, if gate.awaiting_grace() => {
                    if gate.should_start_polling() {
                        info!("⏱️  No push events within grace period, falling back to polling");
                        self.set_phase(ImportPhase::Polling).await;
                    }
                }

                _ = poll.tick(), if gate.polling() => {
                    match self.client.fetch_progress(session).await {
                        Ok(snapshot) => {
                            if gate.on_poll_result()
                                && self.handle_snapshot(&mut tracker, snapshot).await
                            {
                                break;
                            }
                        }
                        Err(e) => debug!("Progress poll failed: {}", e),
                    }
                }
            }
        }

        // 终态后释放推送订阅；轮询定时器随本函数一起结束
        stream_task.abort();
    }

    /// 返回 true 表示已处理终态，监控应当结束
    async fn handle_snapshot(
        &mut self,
        tracker: &mut ProgressTracker,
        snapshot: ImportSnapshot,
    ) -> bool {
        match tracker.observe(snapshot) {
            TrackerVerdict::Apply(snapshot) => {
                let _ = self.events.send(ImportEvent::Progress(snapshot)).await;
                false
            }
            TrackerVerdict::Drop => false,
            TrackerVerdict::Terminal(snapshot) => {
                if snapshot.status == ImportStatus::Completed {
                    info!(
                        "✅ Import completed: {} added, {} skipped, {} errors",
                        snapshot.added, snapshot.skipped, snapshot.errors
                    );
                    self.set_phase(ImportPhase::Completed).await;
                    let _ = self.events.send(ImportEvent::Completed(snapshot)).await;
                } else {
                    self.fail("Import failed on the server", Some(snapshot)).await;
                }
                true
            }
        }
    }

    async fn set_phase(&mut self, phase: ImportPhase) {
        debug!("Import phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase.clone();
        let _ = self.events.send(ImportEvent::PhaseChanged(phase)).await;
    }

    async fn fail(&mut self, reason: &str, in_flight: Option<ImportSnapshot>) {
        error!("❌ {}", reason);
        self.phase = ImportPhase::Failed;
        let _ = self
            .events
            .send(ImportEvent::PhaseChanged(ImportPhase::Failed))
            .await;
        let _ = self
            .events
            .send(ImportEvent::Failed {
                reason: reason.to_string(),
                in_flight,
            })
            .await;
    }
}
