use jobmesh_mesos::{AgentId, Offer, OfferId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// FIFO of offers received since the last launch cycle
///
/// Filled by the engine as offers arrive, drained once per cycle.
#[derive(Debug, Default)]
pub struct OfferBuffer {
    offers: Mutex<VecDeque<Offer>>,
}

impl OfferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, offer: Offer) {
        debug!(offer_id = %offer.id, hostname = %offer.hostname, "Buffering offer");
        self.offers.lock().push_back(offer);
    }

    pub fn extend(&self, offers: impl IntoIterator<Item = Offer>) {
        let mut buffer = self.offers.lock();
        for offer in offers {
            debug!(offer_id = %offer.id, hostname = %offer.hostname, "Buffering offer");
            buffer.push_back(offer);
        }
    }

    /// Take every buffered offer, oldest first
    pub fn drain(&self) -> Vec<Offer> {
        self.offers.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.offers.lock().clear();
    }

    /// Drop a rescinded offer; returns whether it was still buffered
    pub fn remove(&self, offer_id: &OfferId) -> bool {
        let mut buffer = self.offers.lock();
        let before = buffer.len();
        buffer.retain(|offer| &offer.id != offer_id);
        before != buffer.len()
    }

    /// Drop every offer from a lost agent, returning how many were removed
    pub fn remove_by_agent(&self, agent_id: &AgentId) -> usize {
        let mut buffer = self.offers.lock();
        let before = buffer.len();
        buffer.retain(|offer| &offer.agent_id != agent_id);
        before - buffer.len()
    }

    pub fn len(&self) -> usize {
        self.offers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: &str, agent: &str) -> Offer {
        Offer::new(id, agent, format!("host-{}", agent), vec![])
    }

    #[test]
    fn test_drain_is_fifo_and_destructive() {
        let buffer = OfferBuffer::new();
        buffer.push(offer("o1", "S0"));
        buffer.extend(vec![offer("o2", "S1"), offer("o3", "S0")]);

        let drained = buffer.drain();
        let ids: Vec<&str> = drained.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2", "o3"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_remove_and_remove_by_agent() {
        let buffer = OfferBuffer::new();
        buffer.extend(vec![offer("o1", "S0"), offer("o2", "S1"), offer("o3", "S0")]);

        assert!(buffer.remove(&OfferId::new("o2")));
        assert!(!buffer.remove(&OfferId::new("o2")));
        assert_eq!(buffer.remove_by_agent(&AgentId::new("S0")), 2);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_clear() {
        let buffer = OfferBuffer::new();
        buffer.push(offer("o1", "S0"));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
