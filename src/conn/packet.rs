//! Fixed-size packets and the bounded pool that recycles them.
//!
//! Each direction of a wrapped connection buffers at most
//! [`NUM_PACKETS`] packets of [`PACKET_SIZE`] bytes, bounding memory at
//! roughly 512 KiB per direction. The pool keeps a small free list so the
//! hot path rarely allocates.

use std::io;
use std::sync::Mutex;
use std::time::Instant;

/// Fixed packet payload size.
pub const PACKET_SIZE: usize = 4 * 1024;

/// Capacity of each per-direction packet queue.
pub const NUM_PACKETS: usize = 128;

/// Packets kept on the free list.
const POOL_CAPACITY: usize = 10;

/// One unit of buffered data moving through a wrapped connection.
pub(crate) struct Packet {
    /// Payload storage; only `data[..len]` is meaningful.
    pub data: Box<[u8; PACKET_SIZE]>,
    /// Number of valid bytes.
    pub len: usize,
    /// When the packet entered the wrapper: the real-socket receive time on
    /// the read path, the hand-off time on the write path. Delay loops
    /// measure elapsed time against this stamp.
    pub stamp: Instant,
    /// Error raised by the real socket alongside this packet's data.
    pub err: Option<io::Error>,
}

impl Packet {
    fn fresh() -> Self {
        Packet {
            data: Box::new([0u8; PACKET_SIZE]),
            len: 0,
            stamp: Instant::now(),
            err: None,
        }
    }

    /// The valid payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Bounded free list of packets.
pub(crate) struct PacketPool {
    free: Mutex<Vec<Packet>>,
}

impl PacketPool {
    pub fn new() -> Self {
        PacketPool {
            free: Mutex::new(Vec::with_capacity(POOL_CAPACITY)),
        }
    }

    /// Take a recycled packet, or allocate a fresh one if the list is
    /// empty. The returned packet is always reset.
    pub fn get(&self) -> Packet {
        let recycled = self.free.lock().unwrap().pop();
        match recycled {
            Some(mut p) => {
                p.len = 0;
                p.stamp = Instant::now();
                p.err = None;
                p
            }
            None => Packet::fresh(),
        }
    }

    /// Return a packet to the free list; dropped if the list is full.
    pub fn put(&self, packet: Packet) {
        let mut free = self.free.lock().unwrap();
        if free.len() < POOL_CAPACITY {
            free.push(packet);
        }
    }
}
