//! Fan-out of result envelopes to waiting observers.

use std::sync::Arc;

use export_relay_core::{ObserverId, ResultEnvelope, Transport, TransportError};

/// Counts from one `deliver_all` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers envelopes through an ordered list of transports.
///
/// For each observer the transports are tried in order until one
/// accepts the envelope. A failure for one observer never stops
/// delivery to the others.
#[derive(Clone, Default)]
pub struct Broadcaster {
    strategies: Vec<Arc<dyn Transport>>,
}

impl Broadcaster {
    /// Create a broadcaster with a single transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            strategies: vec![transport],
        }
    }

    /// Append a fallback transport, tried after the existing ones.
    #[must_use]
    pub fn with_fallback(mut self, transport: Arc<dyn Transport>) -> Self {
        self.strategies.push(transport);
        self
    }

    /// Deliver `envelope` to every observer.
    pub fn deliver_all<'a, I>(&self, observers: I, envelope: &ResultEnvelope) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a ObserverId>,
    {
        let mut report = DeliveryReport::default();
        for observer in observers {
            match self.deliver(observer, envelope) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        %observer,
                        target_id = %envelope.target,
                        "Failed to deliver result: {e}"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn deliver(&self, observer: &ObserverId, envelope: &ResultEnvelope) -> Result<(), TransportError> {
        let mut last_err = TransportError::ObserverGone(observer.clone());
        for transport in &self.strategies {
            match transport.send(observer, envelope) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(%observer, transport = transport.name(), "Delivery attempt failed: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
