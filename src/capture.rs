//! Capture-source collaborator contract.
//!
//! The actual capture mechanism (promiscuous libpcap capture, BPF filter
//! compilation) is an external collaborator; this module defines the
//! bounded-queue contract the pipeline depends on, plus a `pcap`-backed
//! implementation, using a thread-per-interface producer feeding a
//! single bounded queue.

use crate::error::StartupError;
use crate::packet::PacketRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_QUEUE_DEPTH: usize = 10_000;

/// A bounded, drop-newest-on-full queue shared between one producer
/// thread per interface and the single pipeline consumer.
///
/// Overflow policy: the source increments `dropped` and discards the
/// newest packet rather than blocking.
pub struct CaptureQueue {
    inner: Mutex<VecDeque<PacketRecord>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl CaptureQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Called by a producer thread. Drops the packet and increments the
    /// counter if the queue is at capacity.
    pub fn push(&self, record: PacketRecord) {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        q.push_back(record);
    }

    /// Non-blocking pop for the pipeline consumer.
    pub fn pop(&self) -> Option<PacketRecord> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains every currently-queued packet, oldest first. Used by
    /// `Pipeline::stop(drain = true)`.
    pub fn drain_all(&self) -> Vec<PacketRecord> {
        self.inner.lock().unwrap().drain(..).collect()
    }
}

/// Readiness problems discovered before capture starts. Mirrors
/// `CaptureEngine.check_ready()` in the original, adapted into the
/// `StartupError` list the pipeline returns from `start()`.
pub fn check_ready(interfaces: &[String], has_privileges: bool) -> Vec<StartupError> {
    let mut issues = Vec::new();
    if interfaces.is_empty() {
        issues.push(StartupError::UnknownInterface("<none specified>".into()));
    }
    if !has_privileges {
        for iface in interfaces {
            issues.push(StartupError::InsufficientPrivileges(iface.clone()));
        }
    }
    issues
}

/// One capture source per interface: spawns a producer thread that feeds
/// `PacketRecord`s into the shared [`CaptureQueue`] via a caller-supplied
/// `read_one` closure (a `pcap::Capture` read loop in production, a
/// fixture iterator in tests). Interfaces whose thread dies are marked
/// dormant rather than taking the whole pipeline down.
pub struct CaptureSource {
    interface: String,
    queue: Arc<CaptureQueue>,
    running: Arc<AtomicBool>,
    dormant: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSource {
    pub fn new(interface: impl Into<String>, queue: Arc<CaptureQueue>) -> Self {
        Self {
            interface: interface.into(),
            queue,
            running: Arc::new(AtomicBool::new(false)),
            dormant: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant.load(Ordering::Relaxed)
    }

    /// Spawns the producer thread. `read_one` should block until the next
    /// packet is available (or a short poll interval elapses) and return
    /// `Ok(None)` to signal a harmless idle poll, `Ok(Some(record))` for a
    /// packet, or `Err` for a fatal per-interface read failure.
    pub fn start<F>(&mut self, mut read_one: F)
    where
        F: FnMut() -> Result<Option<PacketRecord>, String> + Send + 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let dormant = self.dormant.clone();
        let queue = self.queue.clone();
        let interface = self.interface.clone();

        self.handle = Some(std::thread::spawn(move || {
            info!(interface = %interface, "capture thread started");
            while running.load(Ordering::SeqCst) {
                match read_one() {
                    Ok(Some(record)) => queue.push(record),
                    Ok(None) => {}
                    Err(reason) => {
                        warn!(interface = %interface, %reason, "capture thread failed, marking dormant");
                        dormant.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
            info!(interface = %interface, "capture thread stopped");
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_newest_when_full() {
        let q = CaptureQueue::new(2);
        let mk = |seq: u32| {
            PacketRecord::new(
                0.0,
                "eth0",
                std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
                std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2)),
                crate::packet::L4Protocol::Udp,
                64,
                64,
            )
            .with_tcp(Default::default(), seq, 0, 0)
        };
        q.push(mk(1));
        q.push(mk(2));
        q.push(mk(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn check_ready_flags_missing_privileges() {
        let issues = check_ready(&["eth0".to_string()], false);
        assert_eq!(issues.len(), 1);
    }
}
