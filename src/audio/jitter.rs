//! Jitter buffer for the live stream path
//!
//! A fixed-capacity byte ring absorbing network delivery-time variance
//! before decode. Packets are stored as `[u16 LE length][payload]`; a push
//! either fully succeeds or fully fails, so a reader that sees a header is
//! guaranteed the payload behind it. Playback start is gated on a one-shot
//! pre-roll threshold.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::constants::PACKET_HEADER_SIZE;

/// One length-prefixed stream packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

struct Inner {
    buf: VecDeque<u8>,
    primed: bool,
}

/// Byte ring buffer with drop-on-full back-pressure and a pre-roll gate
pub struct JitterBuffer {
    inner: Mutex<Inner>,
    data_ready: Condvar,
    capacity: usize,
    trigger: usize,
    max_packet: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl JitterBuffer {
    /// Create a buffer of `capacity` bytes that primes once `preroll_percent`
    /// of it has been filled.
    pub fn new(capacity: usize, preroll_percent: usize, max_packet: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                primed: false,
            }),
            data_ready: Condvar::new(),
            capacity,
            trigger: capacity * preroll_percent / 100,
            max_packet,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Append one packet. Returns false (and drops the packet) when the
    /// buffer lacks room for header + payload, or when the payload size is
    /// outside `1..=max_packet`. Never fatal, only counted.
    pub fn push(&self, payload: &[u8]) -> bool {
        if payload.is_empty() || payload.len() > self.max_packet {
            tracing::warn!("Dropping stream packet of invalid size {}", payload.len());
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut inner = self.inner.lock();
        if self.capacity - inner.buf.len() < PACKET_HEADER_SIZE + payload.len() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let len = payload.len() as u16;
        inner.buf.extend(len.to_le_bytes());
        inner.buf.extend(payload.iter().copied());
        drop(inner);

        self.data_ready.notify_one();
        true
    }

    /// Remove and return the oldest packet, waiting up to `timeout` for one
    /// to arrive. Returns `None` on timeout so the caller can emit silence
    /// and stay on cadence.
    pub fn pop(&self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        while inner.buf.len() < PACKET_HEADER_SIZE {
            if self.data_ready.wait_until(&mut inner, deadline).timed_out() {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let lo = inner.buf.pop_front().unwrap_or(0);
        let hi = inner.buf.pop_front().unwrap_or(0);
        let len = u16::from_le_bytes([lo, hi]) as usize;

        // Pushes are atomic, so the payload behind a header is always present
        let payload: Vec<u8> = inner.buf.drain(..len).collect();
        Some(Packet { payload })
    }

    /// One-shot pre-roll gate: flips true once buffered bytes reach the
    /// trigger threshold and stays true until `reset()`.
    pub fn is_primed(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.primed && inner.buf.len() >= self.trigger {
            inner.primed = true;
            tracing::info!("Pre-roll complete ({} bytes buffered)", inner.buf.len());
        }
        inner.primed
    }

    /// Clear all buffered bytes and re-arm the pre-roll gate
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.buf.clear();
        inner.primed = false;
    }

    /// Buffered byte count (headers included)
    pub fn available(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn trigger_bytes(&self) -> usize {
        self.trigger
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POP: Duration = Duration::from_millis(5);

    #[test]
    fn test_push_pop_fifo() {
        let buffer = JitterBuffer::new(256, 50, 64);

        assert!(buffer.push(&[1, 2, 3]));
        assert!(buffer.push(&[4, 5]));

        assert_eq!(buffer.pop(POP).unwrap().payload, vec![1, 2, 3]);
        assert_eq!(buffer.pop(POP).unwrap().payload, vec![4, 5]);
        assert!(buffer.pop(POP).is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_drop_on_full_preserves_earlier_packets() {
        // Room for exactly two 10-byte packets with headers
        let buffer = JitterBuffer::new(24, 50, 64);

        assert!(buffer.push(&[1u8; 10]));
        assert!(buffer.push(&[2u8; 10]));
        assert!(!buffer.push(&[3u8; 10]));
        assert_eq!(buffer.overflow_count(), 1);

        assert_eq!(buffer.pop(POP).unwrap().payload, vec![1u8; 10]);
        assert_eq!(buffer.pop(POP).unwrap().payload, vec![2u8; 10]);
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let buffer = JitterBuffer::new(256, 50, 8);

        assert!(!buffer.push(&[]));
        assert!(!buffer.push(&[0u8; 9]));
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn test_preroll_gate_is_one_shot() {
        // Trigger at 16 bytes
        let buffer = JitterBuffer::new(32, 50, 16);
        assert!(!buffer.is_primed());

        buffer.push(&[0u8; 14]);
        assert!(buffer.is_primed());

        // Draining below the threshold does not re-arm the gate
        buffer.pop(POP);
        assert_eq!(buffer.available(), 0);
        assert!(buffer.is_primed());
    }

    #[test]
    fn test_reset_clears_bytes_and_gate() {
        let buffer = JitterBuffer::new(32, 50, 16);
        buffer.push(&[0u8; 14]);
        assert!(buffer.is_primed());

        buffer.reset();
        assert!(buffer.pop(POP).is_none());
        assert!(!buffer.is_primed());

        // New data arrives after reset
        buffer.push(&[7u8; 3]);
        assert_eq!(buffer.pop(POP).unwrap().payload, vec![7u8; 3]);
    }

    #[test]
    fn test_pop_wakes_on_push() {
        use std::sync::Arc;

        let buffer = Arc::new(JitterBuffer::new(256, 50, 64));
        let producer = buffer.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(&[9, 9]);
        });

        let packet = buffer.pop(Duration::from_millis(500));
        handle.join().unwrap();
        assert_eq!(packet.unwrap().payload, vec![9, 9]);
    }
}
