use crate::intake::EventEnvelope;
use std::future::Future;
use std::pin::Pin;

pub type ProbeFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// Outbound side of the network, as seen by the engine runner.
pub trait Transport: Send + Sync + 'static {
    /// Fire-and-forget fan-out to every peer. Failures are the transport's
    /// to log; they never reach the apply path.
    fn broadcast(&self, envelope: EventEnvelope);

    fn peer_count(&self) -> usize;

    /// Resolves to `true` if at least one peer answered.
    fn probe(&self) -> ProbeFuture;
}

/// No peers: broadcasts go nowhere and the link is always "up".
#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneTransport;

impl Transport for StandaloneTransport {
    fn broadcast(&self, _envelope: EventEnvelope) {}

    fn peer_count(&self) -> usize {
        0
    }

    fn probe(&self) -> ProbeFuture {
        Box::pin(async { true })
    }
}
