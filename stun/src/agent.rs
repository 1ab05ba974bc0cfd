#[cfg(test)]
mod agent_test;

use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;

use crate::error::*;
use crate::message::*;

#[derive(PartialEq, Eq, Hash, Copy, Clone, Default, Debug)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Returns a new random transaction id.
    pub fn new() -> Self {
        let mut b = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::thread_rng().fill(&mut b.0);
        b
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

/// A transaction in progress, registered until its response arrives or the
/// retransmission schedule gives up.
#[derive(Debug, Clone, Copy)]
pub struct AgentTransaction {
    pub id: TransactionId,
    pub deadline: Instant,
}

/// Low-level registry over the transactions currently in flight.
/// Responses are correlated by transaction id, never by source address.
#[derive(Default)]
pub struct Agent {
    transactions: HashMap<TransactionId, AgentTransaction>,
    closed: bool,
}

impl Agent {
    pub fn new() -> Self {
        Agent::default()
    }

    /// Registers a transaction with the given deadline.
    pub fn remember_transaction(&mut self, id: TransactionId, deadline: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrAgentClosed);
        }
        if self.transactions.contains_key(&id) {
            return Err(Error::ErrTransactionExists);
        }
        self.transactions.insert(id, AgentTransaction { id, deadline });
        Ok(())
    }

    /// Unregisters a transaction, returning whether it was known.
    pub fn forget_transaction(&mut self, id: TransactionId) -> Result<bool> {
        if self.closed {
            return Err(Error::ErrAgentClosed);
        }
        Ok(self.transactions.remove(&id).is_some())
    }

    pub fn find_transaction(&self, id: &TransactionId) -> Option<&AgentTransaction> {
        self.transactions.get(id)
    }

    /// Removes and returns every transaction whose deadline lies before
    /// `gc_time`. Callers fail the associated work.
    pub fn collect(&mut self, gc_time: Instant) -> Vec<TransactionId> {
        let expired: Vec<TransactionId> = self
            .transactions
            .values()
            .filter(|t| t.deadline < gc_time)
            .map(|t| t.id)
            .collect();
        for id in &expired {
            self.transactions.remove(id);
        }
        expired
    }

    /// Drops every transaction and rejects further registration.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ErrAgentClosed);
        }
        self.transactions.clear();
        self.closed = true;
        Ok(())
    }
}
