use crate::ticket::Ticket;

/// The single exclusive device. Busy exactly when some ticket holds it.
#[derive(Debug, Default)]
pub struct ResourceLock {
    holder: Option<Ticket>,
}

impl ResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the device for `ticket` if it is free.
    pub fn try_acquire(&mut self, ticket: Ticket) -> bool {
        if self.holder.is_some() {
            return false;
        }
        self.holder = Some(ticket);
        true
    }

    /// Mark the device free, returning the previous holder. Releasing a free
    /// lock is a no-op.
    pub fn release(&mut self) -> Option<Ticket> {
        self.holder.take()
    }

    pub fn is_busy(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<Ticket> {
        self.holder
    }
}
