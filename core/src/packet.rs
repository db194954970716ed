//! Packet model: the immutable, refcounted unit of data flowing through
//! the streaming message bus.
//!
//! A [`Packet`] is never mutated after construction. Its payload is a
//! [`bytes::Bytes`] handle, so cloning a packet for passthrough or
//! fan-out is an `Arc` bump, never a copy.

use bytes::Bytes;

/// Picture coding type, carried through from the source decoder's
/// reordering or assigned by an encoder on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    I,
    P,
    B,
}

impl FrameType {
    /// Whether a packet of this frame type is safe to use as a random
    /// access point (a mux keyframe flag).
    #[must_use]
    pub const fn is_keyframe(&self) -> bool {
        matches!(self, Self::I)
    }
}

/// An elementary-stream sample unit, immutable after creation.
///
/// `component_index` matches a
/// [`crate::descriptor::ComponentDescriptor::index`] from the start
/// descriptor that announced this packet's stream.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Bytes,
    /// Out-of-band codec extradata (e.g. SPS/PPS, AAC `AudioSpecificConfig`),
    /// set once per lane on first emission.
    pub header: Option<Bytes>,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub component_index: u16,
    pub frame_type: FrameType,
    pub field: bool,
    pub channels: u16,
    /// Sample-rate index into the standard audio sample-rate table.
    pub sri: u8,
    pub aspect_num: u16,
    pub aspect_den: u16,
    pub commercial: bool,
}

impl Packet {
    /// Builds a packet with the given payload and component index,
    /// defaulting every other field to its "unset" value. Callers fill
    /// in timing/frame-type fields explicitly — there is no sensible
    /// default for those.
    pub fn new(component_index: u16, payload: Bytes) -> Self {
        Self {
            payload,
            header: None,
            pts: 0,
            dts: 0,
            duration: 0,
            component_index,
            frame_type: FrameType::P,
            field: false,
            channels: 0,
            sri: 0,
            aspect_num: 1,
            aspect_den: 1,
            commercial: false,
        }
    }

    /// Shallow-clones this packet and re-stamps it onto a different
    /// component index, used by passthrough routing. The payload
    /// `Bytes` handle is shared, not copied.
    #[must_use]
    pub fn restamp(&self, target_index: u16) -> Self {
        Self {
            component_index: target_index,
            ..self.clone()
        }
    }
}

/// A pool of reusable scratch buffers for lane decode/encode staging.
///
/// Lanes pull a buffer out, fill it, and return it when done; this avoids
/// a fresh heap allocation on every packet in the hot path. A simple
/// freelist rather than a size-keyed cache, since scratch buffers here
/// are mutated in place rather than shared.
pub struct PacketPool {
    free: parking_lot::Mutex<Vec<Vec<u8>>>,
    initial_capacity: usize,
}

impl PacketPool {
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            free: parking_lot::Mutex::new(Vec::new()),
            initial_capacity,
        }
    }

    /// Takes a scratch buffer from the pool, allocating a fresh one if
    /// the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity))
    }

    /// Returns a scratch buffer to the pool for reuse. The buffer is
    /// cleared but keeps its allocation.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_only_for_i_frames() {
        assert!(FrameType::I.is_keyframe());
        assert!(!FrameType::P.is_keyframe());
        assert!(!FrameType::B.is_keyframe());
    }

    #[test]
    fn restamp_preserves_payload_and_timestamps() {
        let mut pkt = Packet::new(17, Bytes::from_static(b"abc"));
        pkt.pts = 1000;
        pkt.frame_type = FrameType::I;

        let restamped = pkt.restamp(3);
        assert_eq!(restamped.component_index, 3);
        assert_eq!(restamped.pts, 1000);
        assert_eq!(restamped.frame_type, FrameType::I);
        assert_eq!(restamped.payload, pkt.payload);
    }

    #[test]
    fn pool_reuses_released_buffers() {
        let pool = PacketPool::new(64);
        let buf = pool.acquire();
        let ptr = buf.as_ptr();
        pool.release(buf);
        let buf2 = pool.acquire();
        assert_eq!(buf2.as_ptr(), ptr);
    }
}
