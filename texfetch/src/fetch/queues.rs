//! Transport queue membership and the cancel queue.
//!
//! An identity sits in at most one of the two transport queues. All three
//! collections live behind one lock in the manager; it is only ever held for
//! membership changes, never across I/O.

use std::collections::{HashMap, HashSet};

use crate::fetch::TransportKind;
use crate::id::{Host, ImageId};

#[derive(Debug, Default)]
pub(crate) struct TransportQueues {
    network: HashSet<ImageId>,
    http: HashSet<ImageId>,
    cancel: HashMap<Host, HashSet<ImageId>>,
}

impl TransportQueues {
    /// Put `id` on the queue for `kind`, leaving the other queue.
    pub fn enqueue(&mut self, id: ImageId, kind: TransportKind) {
        match kind {
            TransportKind::Http => {
                self.network.remove(&id);
                self.http.insert(id);
            }
            TransportKind::Datagram => {
                self.http.remove(&id);
                self.network.insert(id);
            }
            TransportKind::Cache => {}
        }
    }

    /// Remove `id` from both transport queues.
    pub fn dequeue(&mut self, id: ImageId) {
        self.network.remove(&id);
        self.http.remove(&id);
    }

    pub fn request_cancel(&mut self, host: Host, id: ImageId) {
        self.cancel.entry(host).or_default().insert(id);
    }

    /// Take every pending cancel, grouped by host.
    pub fn take_cancels(&mut self) -> HashMap<Host, HashSet<ImageId>> {
        std::mem::take(&mut self.cancel)
    }

    pub fn network_ids(&self) -> Vec<ImageId> {
        self.network.iter().copied().collect()
    }

    #[cfg(test)]
    pub fn in_network(&self, id: ImageId) -> bool {
        self.network.contains(&id)
    }

    #[cfg(test)]
    pub fn in_http(&self, id: ImageId) -> bool {
        self.http.contains(&id)
    }

    #[cfg(test)]
    pub fn is_cancel_pending(&self, host: Host, id: ImageId) -> bool {
        self.cancel.get(&host).is_some_and(|ids| ids.contains(&id))
    }

    pub fn network_len(&self) -> usize {
        self.network.len()
    }

    pub fn http_len(&self) -> usize {
        self.http.len()
    }

    pub fn cancel_len(&self) -> usize {
        self.cancel.values().map(HashSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.network.clear();
        self.http.clear();
        self.cancel.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_identity_in_one_queue_only() {
        let mut queues = TransportQueues::default();
        let id = ImageId::from_u128(1);

        queues.enqueue(id, TransportKind::Http);
        assert!(queues.in_http(id));

        queues.enqueue(id, TransportKind::Datagram);
        assert!(queues.in_network(id));
        assert!(!queues.in_http(id));

        queues.dequeue(id);
        assert_eq!(queues.network_len() + queues.http_len(), 0);
    }

    #[test]
    fn test_cancels_grouped_by_host() {
        let mut queues = TransportQueues::default();
        let other: Host = "127.0.0.1:9001".parse().unwrap();

        queues.request_cancel(host(), ImageId::from_u128(1));
        queues.request_cancel(host(), ImageId::from_u128(1));
        queues.request_cancel(other, ImageId::from_u128(2));
        assert_eq!(queues.cancel_len(), 2);
        assert!(queues.is_cancel_pending(host(), ImageId::from_u128(1)));

        let taken = queues.take_cancels();
        assert_eq!(taken.len(), 2);
        assert_eq!(queues.cancel_len(), 0);
    }
}
