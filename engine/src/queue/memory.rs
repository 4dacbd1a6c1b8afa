use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};

use super::DurableQueue;

/// An in-memory, non-persistent queue backed by an unbounded
/// `crossbeam::channel`. Used when the server is configured with
/// `queue=memory` (spec §6.4); its contents are lost on restart, so the
/// writer manager never attempts to replay it.
pub struct MemoryQueue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        Self { tx, rx }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableQueue for MemoryQueue {
    fn put(&self, value: Vec<u8>) -> anyhow::Result<()> {
        self.tx
            .send(value)
            .map_err(|e| anyhow::anyhow!("queue receiver dropped: {}", e))
    }

    fn get(&self, timeout: Option<Duration>) -> anyhow::Result<Option<Vec<u8>>> {
        match timeout {
            None => Ok(self.rx.recv().ok()),
            Some(d) => match self.rx.recv_timeout(d) {
                Ok(v) => Ok(Some(v)),
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => Ok(None),
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Ok(None),
            },
        }
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let q = MemoryQueue::new();
        q.put(vec![1, 2, 3]).unwrap();
        let v = q.get(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[test]
    fn get_times_out_when_empty() {
        let q = MemoryQueue::new();
        let v = q.get(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(v, None);
    }
}
