//! 分诊队列
//!
//! 有界环形缓冲区。接诊是唯一生产者，所有分诊线程是消费者；所有字段只在同一把
//! 互斥锁内读写，每次成功入队唤醒一个等待的消费者。队列满时直接丢弃新患者，
//! 生产者从不等待空位。

use er_core::{ErError, Patient, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// 入队结果
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueue {
    /// 已放入队尾
    Accepted,
    /// 队列已满或已关闭，患者被原样退回
    Dropped(Patient),
}

/// 环形缓冲区本体，只能在持有锁时访问
#[derive(Debug)]
struct Ring {
    slots: Vec<Option<Patient>>,
    head: usize,
    tail: usize,
    count: usize,
    dropped: u64,
    closed: bool,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, patient: Patient) {
        self.slots[self.tail] = Some(patient);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
    }

    fn pop(&mut self) -> Option<Patient> {
        if self.count == 0 {
            return None;
        }
        let patient = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        patient
    }
}

/// 分诊队列
#[derive(Debug)]
pub struct TriageQueue {
    ring: Mutex<Ring>,
    not_empty: Condvar,
}

impl TriageQueue {
    /// 创建指定容量的队列
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ErError::Config("triage queue capacity must be at least 1".to_string()));
        }

        Ok(Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                dropped: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 非阻塞入队
    ///
    /// 队列满 (或已关闭) 时不修改队列内容，返回 [`Enqueue::Dropped`] 作为唯一的丢弃通知。
    pub fn enqueue(&self, patient: Patient) -> Enqueue {
        let mut ring = self.lock();

        if ring.closed {
            return Enqueue::Dropped(patient);
        }
        if ring.count == ring.capacity() {
            ring.dropped += 1;
            warn!(
                "Triage queue is full ({}), dropping patient {}",
                ring.capacity(),
                patient
            );
            return Enqueue::Dropped(patient);
        }

        debug!("Queued patient {} at slot {}", patient, ring.tail);
        ring.push(patient);
        self.not_empty.notify_one();
        Enqueue::Accepted
    }

    /// 阻塞出队
    ///
    /// 队列为空时在条件变量上等待，每次唤醒后重新检查。队列关闭后先排空剩余患者，
    /// 之后返回 `None` 通知消费者退出。
    pub fn dequeue(&self) -> Option<Patient> {
        let mut ring = self.lock();
        loop {
            if let Some(patient) = ring.pop() {
                return Some(patient);
            }
            if ring.closed {
                return None;
            }
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 关闭队列并唤醒所有等待者
    pub fn close(&self) {
        let mut ring = self.lock();
        ring.closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 因队列满而丢弃的患者数
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::patient;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(TriageQueue::new(0).is_err());
    }

    #[test]
    fn test_capacity_two_scenario() {
        let queue = TriageQueue::new(2).unwrap();

        assert_eq!(queue.enqueue(patient(1, "A")), Enqueue::Accepted);
        assert_eq!(queue.enqueue(patient(2, "B")), Enqueue::Accepted);
        assert_eq!(queue.enqueue(patient(3, "C")), Enqueue::Dropped(patient(3, "C")));
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.dequeue().map(|p| p.name), Some("A".to_string()));
        assert_eq!(queue.enqueue(patient(3, "C")), Enqueue::Accepted);

        assert_eq!(queue.dequeue().map(|p| p.name), Some("B".to_string()));
        assert_eq!(queue.dequeue().map(|p| p.name), Some("C".to_string()));
    }

    #[test]
    fn test_full_queue_contents_unchanged() {
        let queue = TriageQueue::new(3).unwrap();
        for i in 0..3 {
            queue.enqueue(patient(i, "kept"));
        }

        let outcome = queue.enqueue(patient(99, "late"));
        assert!(matches!(outcome, Enqueue::Dropped(ref p) if p.arrival_number == 99));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);

        let drained: Vec<i32> = (0..3).filter_map(|_| queue.dequeue()).map(|p| p.arrival_number).collect();
        assert_eq!(drained, vec![0, 1, 2]);
    }

    #[test]
    fn test_wraps_around_ring() {
        let queue = TriageQueue::new(3).unwrap();
        let mut seen = Vec::new();

        for i in 0..10 {
            assert_eq!(queue.enqueue(patient(i, "p")), Enqueue::Accepted);
            if i % 2 == 1 {
                seen.push(queue.dequeue().unwrap().arrival_number);
                seen.push(queue.dequeue().unwrap().arrival_number);
            }
        }

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_releases_blocked_consumers() {
        let queue = Arc::new(TriageQueue::new(4).unwrap());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.dequeue())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
        assert_eq!(queue.enqueue(patient(1, "after")), Enqueue::Dropped(patient(1, "after")));
    }

    #[test]
    fn test_close_drains_before_poison() {
        let queue = TriageQueue::new(4).unwrap();
        queue.enqueue(patient(1, "a"));
        queue.enqueue(patient(2, "b"));
        queue.close();

        assert_eq!(queue.dequeue().map(|p| p.arrival_number), Some(1));
        assert_eq!(queue.dequeue().map(|p| p.arrival_number), Some(2));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_concurrent_consumers_receive_each_patient_once() {
        let capacity = 4;
        let total = 500;
        let queue = Arc::new(TriageQueue::new(capacity).unwrap());

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(p) = queue.dequeue() {
                        assert!(queue.len() <= capacity);
                        taken.push(p.arrival_number);
                    }
                    taken
                })
            })
            .collect();

        let mut accepted = Vec::new();
        for i in 0..total {
            // 生产者不等待空位，被丢弃的患者重试直到入队
            let mut candidate = patient(i, "p");
            loop {
                match queue.enqueue(candidate) {
                    Enqueue::Accepted => break,
                    Enqueue::Dropped(back) => {
                        candidate = back;
                        thread::yield_now();
                    }
                }
                assert!(queue.len() <= capacity);
            }
            accepted.push(i);
        }
        queue.close();

        let mut received = Vec::new();
        for consumer in consumers {
            let taken = consumer.join().unwrap();
            // 单个消费者看到的顺序与入队顺序一致
            assert!(taken.windows(2).all(|w| w[0] < w[1]));
            received.extend(taken);
        }

        assert_eq!(received.len(), accepted.len());
        let unique: HashSet<i32> = received.into_iter().collect();
        assert_eq!(unique.len(), total as usize);
    }
}
