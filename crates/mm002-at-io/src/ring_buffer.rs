//! Lock-free byte ring between the receive path and the line consumer.
//!
//! Exactly one producer (the link I/O task) calls [`RingBuffer::write`] and
//! exactly one consumer (the link engine) calls the read-side methods. No
//! lock is taken on either side.
//!
//! # Overflow
//!
//! Writes never fail and never block. When the producer laps the consumer,
//! the oldest unread bytes are lost and the consumer resumes at the most
//! recent `capacity` bytes. The loss is counted in
//! [`RingBuffer::overwritten`].
//!
//! # Memory ordering
//!
//! Positions are free-running byte counts, masked into the slot array.
//! The producer publishes the end of the region it is about to overwrite in
//! `reserved` before touching any slot, and publishes `head` after the
//! last slot store. The consumer copies slots out first and checks
//! `reserved` afterwards. A copy that overlaps a concurrent overwrite is
//! detected this way and retried, so a torn line never reaches the caller.

use std::sync::atomic::{fence, AtomicU64, AtomicU8, AtomicUsize, Ordering};

pub struct RingBuffer {
    slots: Box<[AtomicU8]>,
    mask: usize,
    /// Bytes ever written. Producer-owned, published with Release.
    head: AtomicUsize,
    /// End position of the write in progress. Producer-owned.
    reserved: AtomicUsize,
    /// Bytes ever consumed or skipped. Consumer-owned.
    tail: AtomicUsize,
    /// Bytes lost to overwrite that the consumer has already stepped over.
    lost: AtomicU64,
}

impl RingBuffer {
    /// Create a ring holding at least `capacity` bytes. The capacity is
    /// rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        RingBuffer {
            slots: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    // -----------------------------------------------------------------------
    // Producer side
    // -----------------------------------------------------------------------

    /// Append `bytes`, overwriting the oldest unread data if necessary.
    ///
    /// Always reports `bytes.len()` written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let end = head.wrapping_add(bytes.len());
        // Only the last `capacity` bytes can survive this call.
        let skip = bytes.len().saturating_sub(self.capacity());

        self.reserved.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        for (i, &byte) in bytes[skip..].iter().enumerate() {
            let pos = head.wrapping_add(skip + i);
            self.slots[pos & self.mask].store(byte, Ordering::Relaxed);
        }

        self.head.store(end, Ordering::Release);
        bytes.len()
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Number of unread bytes, never more than the capacity.
    pub fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Total bytes discarded by overwrite since creation.
    pub fn overwritten(&self) -> u64 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let pending = head.wrapping_sub(tail).saturating_sub(self.capacity());
        self.lost.load(Ordering::Relaxed) + pending as u64
    }

    /// Remove and return the oldest byte.
    pub fn read_byte(&self) -> Option<u8> {
        let mut buf = [0u8; 1];
        (self.read(&mut buf) == 1).then_some(buf[0])
    }

    /// Remove up to `buf.len()` of the oldest bytes into `buf`.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut copy = Vec::with_capacity(buf.len().min(self.capacity()));
        let start = self.snapshot(buf.len(), None, &mut copy);
        buf[..copy.len()].copy_from_slice(&copy);
        self.consume(start, copy.len());
        copy.len()
    }

    /// Copy up to `buf.len()` of the oldest bytes without removing them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let mut copy = Vec::with_capacity(buf.len().min(self.capacity()));
        self.snapshot(buf.len(), None, &mut copy);
        buf[..copy.len()].copy_from_slice(&copy);
        copy.len()
    }

    /// Remove and return one complete line, including its `\n`.
    ///
    /// The line feed must lie within the first `max_len` unread bytes.
    /// Otherwise nothing is consumed and `None` is returned, however often
    /// this is called, until the terminator arrives.
    pub fn read_line(&self, max_len: usize) -> Option<Vec<u8>> {
        let mut line = Vec::new();
        let start = self.snapshot(max_len, Some(b'\n'), &mut line);
        if line.last() != Some(&b'\n') {
            return None;
        }
        self.consume(start, line.len());
        Some(line)
    }

    /// Discard up to `n` of the oldest bytes. Returns how many were dropped.
    pub fn skip(&self, n: usize) -> usize {
        let (tail, head) = self.resync();
        let n = n.min(head.wrapping_sub(tail));
        self.consume(tail, n);
        n
    }

    /// Discard everything currently buffered.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }

    /// Step over bytes the producer has already overwritten.
    fn resync(&self) -> (usize, usize) {
        let head = self.head.load(Ordering::Acquire);
        let mut tail = self.tail.load(Ordering::Relaxed);
        let pending = head.wrapping_sub(tail);
        if pending > self.capacity() {
            let lost = pending - self.capacity();
            tail = head.wrapping_sub(self.capacity());
            self.tail.store(tail, Ordering::Release);
            self.lost.fetch_add(lost as u64, Ordering::Relaxed);
        }
        (tail, head)
    }

    /// Copy unread bytes into `out` without consuming them, stopping after
    /// `max` bytes or after the first `until` byte. Returns the position of
    /// the first copied byte.
    fn snapshot(&self, max: usize, until: Option<u8>, out: &mut Vec<u8>) -> usize {
        loop {
            out.clear();
            let (tail, head) = self.resync();
            let len = head.wrapping_sub(tail).min(max);
            for i in 0..len {
                let byte = self.slots[tail.wrapping_add(i) & self.mask].load(Ordering::Relaxed);
                out.push(byte);
                if until == Some(byte) {
                    break;
                }
            }

            fence(Ordering::Acquire);
            let reserved = self.reserved.load(Ordering::Relaxed);
            if reserved.wrapping_sub(tail) <= self.capacity() {
                return tail;
            }
            // Lapped mid-copy. Retry from the new oldest byte.
            std::hint::spin_loop();
        }
    }

    fn consume(&self, start: usize, n: usize) {
        if n > 0 {
            self.tail.store(start.wrapping_add(n), Ordering::Release);
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("overwritten", &self.overwritten())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn drain(ring: &RingBuffer) -> Vec<u8> {
        let mut out = vec![0u8; ring.capacity()];
        let n = ring.read(&mut out);
        out.truncate(n);
        out
    }

    // -----------------------------------------------------------------------
    // Basic reads and writes
    // -----------------------------------------------------------------------

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(RingBuffer::new(1000).capacity(), 1024);
        assert_eq!(RingBuffer::new(16).capacity(), 16);
        assert_eq!(RingBuffer::new(0).capacity(), 1);
    }

    #[test]
    fn write_then_read_in_order() {
        let ring = RingBuffer::new(16);
        assert_eq!(ring.write(b"hello"), 5);
        assert_eq!(ring.available(), 5);
        assert_eq!(drain(&ring), b"hello");
        assert!(ring.is_empty());
    }

    #[test]
    fn read_returns_fewer_when_short() {
        let ring = RingBuffer::new(16);
        ring.write(b"ab");
        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(ring.read(&mut buf), 0);
    }

    #[test]
    fn read_byte_pops_oldest() {
        let ring = RingBuffer::new(4);
        ring.write(b"xy");
        assert_eq!(ring.read_byte(), Some(b'x'));
        assert_eq!(ring.read_byte(), Some(b'y'));
        assert_eq!(ring.read_byte(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let ring = RingBuffer::new(16);
        ring.write(b"OK\r\n");
        let mut buf = [0u8; 2];
        assert_eq!(ring.peek(&mut buf), 2);
        assert_eq!(&buf, b"OK");
        assert_eq!(ring.available(), 4);
    }

    #[test]
    fn skip_and_clear() {
        let ring = RingBuffer::new(16);
        ring.write(b"0123456789");
        assert_eq!(ring.skip(4), 4);
        assert_eq!(ring.read_byte(), Some(b'4'));
        assert_eq!(ring.skip(100), 5);
        ring.write(b"abc");
        ring.clear();
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn positions_wrap_around_the_slot_array() {
        let ring = RingBuffer::new(8);
        for round in 0..20u8 {
            ring.write(&[round, round + 1, round + 2]);
            assert_eq!(drain(&ring), vec![round, round + 1, round + 2]);
        }
    }

    // -----------------------------------------------------------------------
    // Overwrite on overflow
    // -----------------------------------------------------------------------

    #[test]
    fn oversized_write_keeps_most_recent_capacity_bytes() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.write(b"0123456789ABCDEF!"), 17);
        assert_eq!(ring.available(), 8);
        assert_eq!(drain(&ring), b"9ABCDEF!");
        assert_eq!(ring.overwritten(), 9);
    }

    #[test]
    fn lapping_the_reader_discards_oldest() {
        let ring = RingBuffer::new(8);
        ring.write(b"abcdef");
        ring.write(b"ghijk");
        assert_eq!(ring.available(), 8);
        assert_eq!(ring.overwritten(), 3);
        assert_eq!(drain(&ring), b"defghijk");
        assert_eq!(ring.overwritten(), 3);
    }

    #[test]
    fn random_write_sequences_match_bounded_model() {
        let mut rng = StdRng::seed_from_u64(0x4d4d_3030_32);
        for _ in 0..200 {
            let ring = RingBuffer::new(32);
            let mut model: VecDeque<u8> = VecDeque::new();
            for _ in 0..rng.gen_range(1..12) {
                let len = rng.gen_range(0..80);
                let chunk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                ring.write(&chunk);
                model.extend(chunk);
                while model.len() > ring.capacity() {
                    model.pop_front();
                }
                if rng.gen_bool(0.3) {
                    let take = rng.gen_range(0..16);
                    let mut buf = vec![0u8; take];
                    let n = ring.read(&mut buf);
                    let expected: Vec<u8> = model.drain(..take.min(model.len())).collect();
                    assert_eq!(&buf[..n], expected.as_slice());
                }
            }
            assert_eq!(ring.available(), model.len());
            assert_eq!(drain(&ring), model.into_iter().collect::<Vec<_>>());
        }
    }

    // -----------------------------------------------------------------------
    // Line framing
    // -----------------------------------------------------------------------

    #[test]
    fn read_line_returns_complete_line_with_terminator() {
        let ring = RingBuffer::new(64);
        ring.write(b"OK\r\n+MAC: SND,0\r\n");
        assert_eq!(ring.read_line(64), Some(b"OK\r\n".to_vec()));
        assert_eq!(ring.read_line(64), Some(b"+MAC: SND,0\r\n".to_vec()));
        assert_eq!(ring.read_line(64), None);
    }

    #[test]
    fn read_line_without_terminator_consumes_nothing_repeatedly() {
        let ring = RingBuffer::new(64);
        ring.write(b"+MAC: RDR,SF7");
        for _ in 0..5 {
            assert_eq!(ring.read_line(64), None);
            assert_eq!(ring.available(), 13);
        }
        ring.write(b"BW125\n");
        assert_eq!(ring.read_line(64), Some(b"+MAC: RDR,SF7BW125\n".to_vec()));
    }

    #[test]
    fn read_line_respects_max_len() {
        let ring = RingBuffer::new(64);
        ring.write(b"0123456789\n");
        assert_eq!(ring.read_line(8), None);
        assert_eq!(ring.available(), 11);
        assert_eq!(ring.read_line(11), Some(b"0123456789\n".to_vec()));
    }

    // -----------------------------------------------------------------------
    // Producer and consumer on separate threads
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_lines_arrive_intact_and_in_order() {
        const LINES: u32 = 5_000;
        let ring = Arc::new(RingBuffer::new(256));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..LINES {
                    let line = format!("+SEQ: {i},{}\r\n", i.wrapping_mul(7));
                    // Stay within capacity so nothing is overwritten.
                    while ring.capacity() - ring.available() < line.len() {
                        std::thread::yield_now();
                    }
                    ring.write(line.as_bytes());
                }
            })
        };

        let mut expected = 0;
        while expected < LINES {
            match ring.read_line(64) {
                Some(line) => {
                    let text = String::from_utf8(line).unwrap();
                    assert_eq!(text, format!("+SEQ: {expected},{}\r\n", expected.wrapping_mul(7)));
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(ring.overwritten(), 0);
    }

    /// Oldest line in `lines[*next..]` that ends with `fragment`. Advances
    /// `next` past it so later fragments must come from later lines.
    fn match_suffix(lines: &[String], next: &mut usize, fragment: &[u8]) {
        let found = lines[*next..]
            .iter()
            .position(|line| line.as_bytes().ends_with(fragment));
        match found {
            Some(offset) => *next += offset + 1,
            None => panic!(
                "{:?} is not the tail of any line written after #{}",
                String::from_utf8_lossy(fragment),
                next
            ),
        }
    }

    #[test]
    fn overwriting_producer_never_yields_torn_lines() {
        const LINES: u32 = 20_000;
        let lines: Vec<String> = (0..LINES)
            .map(|i| format!("+SEQ: {i},{}\r\n", i.wrapping_mul(7)))
            .collect();
        let total: usize = lines.iter().map(String::len).sum();

        let ring = Arc::new(RingBuffer::new(64));
        let producer = {
            let ring = Arc::clone(&ring);
            let lines = lines.clone();
            std::thread::spawn(move || {
                for line in &lines {
                    ring.write(line.as_bytes());
                }
            })
        };

        let mut next = 0;
        let mut consumed = 0;
        let mut reads = 0u32;
        while !producer.is_finished() {
            match ring.read_line(64) {
                Some(fragment) => {
                    consumed += fragment.len();
                    match_suffix(&lines, &mut next, &fragment);
                    reads += 1;
                    if reads % 64 == 0 {
                        // Fall behind now and then so the producer laps us.
                        std::thread::sleep(std::time::Duration::from_micros(200));
                    }
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        while let Some(fragment) = ring.read_line(64) {
            consumed += fragment.len();
            match_suffix(&lines, &mut next, &fragment);
        }

        assert!(ring.is_empty());
        assert!(ring.overwritten() > 0);
        assert_eq!(consumed as u64 + ring.overwritten(), total as u64);
        // The final line is always intact once the producer is done.
        assert_eq!(next, lines.len());
    }
}
