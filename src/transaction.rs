// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transactions (event blocks).
//!
//! A transaction groups events so they are sent as one unit. Each
//! transaction moves through `Open → Submitted | Discarded`; both outcomes
//! are terminal and the identifier cannot be reused afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;
use crate::event::EventEnvelope;

/// Identifier of a transaction issued by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Creates a transaction ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trx({})", self.0)
    }
}

/// Table of open transactions and their pending events.
///
/// Identifiers are issued from a monotonic counter, so an identifier below
/// the counter that is no longer open must have been submitted or removed.
#[derive(Debug)]
pub(crate) struct TransactionTable {
    next_id: u64,
    open: HashMap<TransactionId, Vec<EventEnvelope>>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            open: HashMap::new(),
        }
    }

    /// Opens a new, empty transaction.
    pub(crate) fn start(&mut self) -> TransactionId {
        let id = TransactionId::new(self.next_id);
        self.next_id += 1;
        self.open.insert(id, Vec::new());
        id
    }

    /// Appends an event to an open transaction.
    pub(crate) fn add(
        &mut self,
        id: TransactionId,
        event: EventEnvelope,
    ) -> Result<(), TransactionError> {
        match self.open.get_mut(&id) {
            Some(events) => {
                events.push(event);
                Ok(())
            }
            None => Err(self.closed_or_unknown(id)),
        }
    }

    /// Returns `true` if the transaction is open.
    pub(crate) fn is_open(&self, id: TransactionId) -> bool {
        self.open.contains_key(&id)
    }

    /// Checks that the transaction is open without changing it.
    pub(crate) fn check_open(&self, id: TransactionId) -> Result<(), TransactionError> {
        if self.is_open(id) {
            Ok(())
        } else {
            Err(self.closed_or_unknown(id))
        }
    }

    /// Closes the transaction and hands back its events for sending.
    pub(crate) fn submit(&mut self, id: TransactionId) -> Result<Vec<EventEnvelope>, TransactionError> {
        self.open
            .remove(&id)
            .ok_or_else(|| self.closed_or_unknown(id))
    }

    /// Closes the transaction and drops its events.
    ///
    /// Returns the number of discarded events.
    pub(crate) fn discard(&mut self, id: TransactionId) -> Result<usize, TransactionError> {
        self.open
            .remove(&id)
            .map(|events| events.len())
            .ok_or_else(|| self.closed_or_unknown(id))
    }

    /// Discards every open transaction, returning how many there were.
    pub(crate) fn discard_all(&mut self) -> usize {
        let count = self.open.len();
        self.open.clear();
        count
    }

    /// Returns the number of open transactions.
    pub(crate) fn open_count(&self) -> usize {
        self.open.len()
    }

    fn closed_or_unknown(&self, id: TransactionId) -> TransactionError {
        if id.0 > 0 && id.0 < self.next_id {
            TransactionError::Closed(id)
        } else {
            TransactionError::Unknown(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(fqn: &str) -> EventEnvelope {
        EventEnvelope {
            fqn: fqn.to_string(),
            target: None,
            payload: json!({}),
        }
    }

    #[test]
    fn start_issues_increasing_ids() {
        let mut table = TransactionTable::new();
        let a = table.start();
        let b = table.start();
        assert!(b > a);
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn submit_returns_events_in_order() {
        let mut table = TransactionTable::new();
        let id = table.start();
        table.add(id, event("a.First")).unwrap();
        table.add(id, event("a.Second")).unwrap();

        let events = table.submit(id).unwrap();
        let fqns: Vec<_> = events.iter().map(|e| e.fqn.as_str()).collect();
        assert_eq!(fqns, ["a.First", "a.Second"]);
        assert!(!table.is_open(id));
    }

    #[test]
    fn add_after_submit_is_closed() {
        let mut table = TransactionTable::new();
        let id = table.start();
        table.submit(id).unwrap();

        assert_eq!(
            table.add(id, event("a.Late")),
            Err(TransactionError::Closed(id))
        );
    }

    #[test]
    fn add_after_discard_is_closed() {
        let mut table = TransactionTable::new();
        let id = table.start();
        table.add(id, event("a.One")).unwrap();

        assert_eq!(table.discard(id), Ok(1));
        assert_eq!(
            table.add(id, event("a.Late")),
            Err(TransactionError::Closed(id))
        );
        assert_eq!(table.submit(id), Err(TransactionError::Closed(id)));
        assert_eq!(table.discard(id), Err(TransactionError::Closed(id)));
    }

    #[test]
    fn never_issued_id_is_unknown() {
        let mut table = TransactionTable::new();
        let bogus = TransactionId::new(42);

        assert_eq!(
            table.add(bogus, event("a.B")),
            Err(TransactionError::Unknown(bogus))
        );
        assert_eq!(
            table.check_open(TransactionId::new(0)),
            Err(TransactionError::Unknown(TransactionId::new(0)))
        );
    }

    #[test]
    fn empty_transaction_submits_nothing() {
        let mut table = TransactionTable::new();
        let id = table.start();
        assert!(table.submit(id).unwrap().is_empty());
    }

    #[test]
    fn discard_all_clears_open() {
        let mut table = TransactionTable::new();
        let first = table.start();
        table.start();

        assert_eq!(table.discard_all(), 2);
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.check_open(first), Err(TransactionError::Closed(first)));
    }

    #[test]
    fn display() {
        assert_eq!(TransactionId::new(3).to_string(), "Trx(3)");
        assert_eq!(TransactionId::new(3).value(), 3);
    }
}
