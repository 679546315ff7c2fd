// Correlation table for in-flight transport operations.
//
// Each entry pairs a request handle with the message it transports, so the
// two can never drift apart: removing an entry removes both halves at once.

use super::message::Message;
use crate::Transport::{RequestHandle, TransportError};

pub(crate) struct Pending {
    pub request: RequestHandle,
    pub message: Message,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Vec<Pending>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: RequestHandle, message: Message) {
        self.entries.push(Pending { request, message });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tests every entry and removes the completed ones, returning their
    /// messages. Removal swaps the last entry into the hole; order among
    /// pending operations is not meaningful.
    pub fn reap<F>(&mut self, mut test: F) -> Result<Vec<Message>, TransportError>
    where
        F: FnMut(RequestHandle, &mut Message) -> Result<bool, TransportError>,
    {
        let mut completed = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &mut self.entries[i];
            if test(entry.request, &mut entry.message)? {
                completed.push(self.entries.swap_remove(i).message);
            } else {
                i += 1;
            }
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(byte: u8) -> Message {
        Message::from_bytes(&[byte]).unwrap()
    }

    #[test]
    fn reap_removes_request_and_message_together() {
        let mut table = PendingTable::new();
        for i in 0..6u8 {
            table.push(RequestHandle::new(i as u64), message(i));
        }

        // Complete the even requests.
        let done = table
            .reap(|request, message| {
                assert_eq!(request.id() as u8, message.data()[0]);
                Ok(request.id() % 2 == 0)
            })
            .unwrap();

        let mut done: Vec<u8> = done.iter().map(|m| m.data()[0]).collect();
        done.sort_unstable();
        assert_eq!(done, vec![0, 2, 4]);
        assert_eq!(table.len(), 3);

        // Every surviving entry still pairs its handle with its own message.
        let rest = table
            .reap(|request, message| Ok(request.id() as u8 == message.data()[0]))
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert!(table.is_empty());
    }

    #[test]
    fn reap_with_nothing_complete_keeps_everything() {
        let mut table = PendingTable::new();
        table.push(RequestHandle::new(1), message(1));
        table.push(RequestHandle::new(2), message(2));

        let done = table.reap(|_, _| Ok(false)).unwrap();
        assert!(done.is_empty());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reap_propagates_transport_errors() {
        let mut table = PendingTable::new();
        table.push(RequestHandle::new(7), message(7));

        let err = table
            .reap(|request, _| Err(TransportError::UnknownRequest(request)))
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownRequest(r) if r.id() == 7));
    }
}
