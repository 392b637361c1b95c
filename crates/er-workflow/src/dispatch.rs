//! # 分发通道
//!
//! 分诊线程与医生任务之间按标签寻址的消息通道。每个标签一个信箱：
//!
//! - 同一标签内先进先出，不同标签之间不保证顺序
//! - 接收方只取与自身标签完全相等的消息
//! - 治疗消息受每标签积压上限约束，终止消息不受限，轮换和停机不会被拒绝
//! - 发送从不阻塞；接收在标签自己的唤醒原语上最多等待给定时长
//!
//! 发送方是分诊 OS 线程，接收方是 tokio 任务，信箱用同步互斥锁保护，
//! 唤醒用 [`tokio::sync::Notify`]，两侧都可以直接调用。

use async_trait::async_trait;
use er_core::Patient;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

/// 消息标签
pub type Tag = u64;

/// 通道上的消息
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchMessage {
    /// 治疗指令
    Treat(Patient),
    /// 终止哨兵，收到后医生正常退出
    Terminate,
}

/// 分发通道错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("标签 {0} 暂无消息")]
    Empty(Tag),

    #[error("标签 {tag} 积压已达上限 {limit}")]
    Full { tag: Tag, limit: usize },

    #[error("分发通道已关闭")]
    Closed,
}

/// 按标签寻址的传输层
#[async_trait]
pub trait Transport: Send + Sync {
    /// 非阻塞发送
    fn send(&self, tag: Tag, message: DispatchMessage) -> Result<(), DispatchError>;

    /// 取出该标签最早的消息，最多等待 `wait`
    async fn receive(&self, tag: Tag, wait: Duration) -> Result<DispatchMessage, DispatchError>;

    /// 该标签待处理的治疗消息数
    fn backlog(&self, tag: Tag) -> usize;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Default)]
struct Mailbox {
    messages: VecDeque<DispatchMessage>,
    pending_treat: usize,
    notify: Arc<Notify>,
}

impl Mailbox {
    fn push(&mut self, message: DispatchMessage) {
        if matches!(message, DispatchMessage::Treat(_)) {
            self.pending_treat += 1;
        }
        self.messages.push_back(message);
        self.notify.notify_one();
    }

    fn pop(&mut self) -> Option<DispatchMessage> {
        let message = self.messages.pop_front()?;
        if matches!(message, DispatchMessage::Treat(_)) {
            self.pending_treat -= 1;
        }
        Some(message)
    }
}

#[derive(Debug, Default)]
struct State {
    mailboxes: HashMap<Tag, Mailbox>,
    closed: bool,
}

/// 进程内分发通道
#[derive(Debug)]
pub struct DispatchChannel {
    state: Mutex<State>,
    backlog_limit: usize,
}

impl DispatchChannel {
    /// 创建通道，`backlog_limit` 为每个标签的治疗消息上限
    pub fn new(backlog_limit: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            backlog_limit: backlog_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for DispatchChannel {
    fn send(&self, tag: Tag, message: DispatchMessage) -> Result<(), DispatchError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DispatchError::Closed);
        }

        let mailbox = state.mailboxes.entry(tag).or_default();
        if matches!(message, DispatchMessage::Treat(_)) && mailbox.pending_treat >= self.backlog_limit {
            return Err(DispatchError::Full {
                tag,
                limit: self.backlog_limit,
            });
        }

        mailbox.push(message);
        debug!(tag, backlog = mailbox.pending_treat, "Message dispatched");
        Ok(())
    }

    async fn receive(&self, tag: Tag, wait: Duration) -> Result<DispatchMessage, DispatchError> {
        let deadline = Instant::now() + wait;

        loop {
            let notify = {
                let mut state = self.lock();
                let closed = state.closed;
                let mailbox = state.mailboxes.entry(tag).or_default();
                if let Some(message) = mailbox.pop() {
                    return Ok(message);
                }
                if closed {
                    return Err(DispatchError::Closed);
                }
                mailbox.notify.clone()
            };

            // notify_one 在无人等待时保留许可，释放锁之后才开始等待也不会错过唤醒
            if timeout_at(deadline, notify.notified()).await.is_err() {
                return Err(DispatchError::Empty(tag));
            }
        }
    }

    fn backlog(&self, tag: Tag) -> usize {
        self.lock()
            .mailboxes
            .get(&tag)
            .map(|mailbox| mailbox.pending_treat)
            .unwrap_or(0)
    }

    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for mailbox in state.mailboxes.values() {
            mailbox.notify.notify_waiters();
            mailbox.notify.notify_one();
        }
        info!("Dispatch channel closed");
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
