use std::{collections::VecDeque, fmt};

/// Ordering token handed to each call. Ids start at 0 and are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues tickets and keeps the outstanding ones in arrival order.
///
/// Not synchronized on its own: the gate keeps it behind the same mutex as the
/// resource lock.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    next_id: u64,
    queue: VecDeque<Ticket>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and append it to the tail of the queue.
    pub fn enqueue(&mut self) -> Ticket {
        let ticket = Ticket(self.next_id);
        self.next_id += 1;
        self.queue.push_back(ticket);
        ticket
    }

    /// Remove a ticket wherever it sits. Returns false if it was not queued.
    pub fn remove(&mut self, ticket: Ticket) -> bool {
        match self.position(ticket) {
            Some(pos) => self.queue.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn peek_head(&self) -> Option<Ticket> {
        self.queue.front().copied()
    }

    pub fn position(&self, ticket: Ticket) -> Option<usize> {
        self.queue.iter().position(|t| *t == ticket)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Ticket> {
        self.queue.iter().copied().collect()
    }
}
