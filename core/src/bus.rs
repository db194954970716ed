//! Streaming message bus.
//!
//! A [`Sink`] exposes exactly one capability: accept one message now.
//! `accept` is total — it never panics and never returns a `Result`;
//! failures are logged and swallowed at the point they occur. The bus
//! does no buffering of its own; lanes implement their own
//! backpressure.

use std::sync::Arc;

use crate::descriptor::StartDescriptor;
use crate::packet::Packet;

/// Tagged variant of every message that can cross a sink boundary.
/// Exactly one payload per tag.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Packet(Packet),
    Start(Arc<StartDescriptor>),
    Stop,
    Exit,
    ServiceStatus(u32),
    SignalStatus(SignalStatus),
    NoStart(String),
    MpegtsBlock(bytes::Bytes),
    Speed(u32),
    Skip(i64),
    TimeshiftStatus(TimeshiftStatus),
}

/// Opaque passthrough payloads the core forwards unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalStatus {
    pub snr: u16,
    pub signal: u16,
    pub ber: u32,
    pub unc: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeshiftStatus {
    pub full: bool,
    pub shift: i64,
}

/// A composable message sink. Implementors forward, transform, or
/// consume a message; they must never block indefinitely or panic.
pub trait Sink: Send + Sync {
    fn accept(&self, msg: StreamMessage);
}

/// A sink that forwards every message unchanged to another sink. Used
/// to wire a lane's consumer thread to whatever sits downstream of the
/// transcoder session.
pub struct ForwardingSink {
    downstream: Arc<dyn Sink>,
}

impl ForwardingSink {
    #[must_use]
    pub fn new(downstream: Arc<dyn Sink>) -> Self {
        Self { downstream }
    }
}

impl Sink for ForwardingSink {
    fn accept(&self, msg: StreamMessage) {
        self.downstream.accept(msg);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::packet::Packet;
    use std::sync::Arc;

    #[test]
    fn forwarding_sink_passes_messages_through() {
        let recorder = Arc::new(RecordingSink::default());
        let fwd = ForwardingSink::new(recorder.clone());

        fwd.accept(StreamMessage::Packet(Packet::new(1, bytes::Bytes::new())));
        fwd.accept(StreamMessage::Stop);

        let received = recorder.received.lock();
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], StreamMessage::Packet(_)));
        assert!(matches!(received[1], StreamMessage::Stop));
    }
}
