use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};

/// 生产者和消费者之间的有界批次队列
///
/// put 在队列满时阻塞（背压），get 最多等待 timeout，超时返回 None 而不是报错，
/// 以便消费者有机会定期检查关闭标志
pub struct BatchQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> BatchQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// 入队一个批次，队列满时阻塞
    pub fn put(&self, item: T) -> Result<()> {
        self.tx.send(item).map_err(|_| anyhow!("队列已关闭"))
    }

    /// 出队一个批次，最多等待 timeout
    pub fn get(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), rx: self.rx.clone() }
    }
}

/// 生产者一侧置位的关闭标志
///
/// 消费者需要同时观察到「标志已置位」和「队列为空」才能退出，
/// 这个顺序保证关闭前入队的批次不会丢失
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
