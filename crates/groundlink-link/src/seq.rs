/// Caller-owned outbound sequence counter for one logical stream.
///
/// Sequence numbers are 8-bit and wrap. Every adapter carrying the same
/// logical message must be given the same number, so advance once per
/// message, not once per adapter.
///
/// A fresh counter starts at 1: receivers that initialise their "last seen"
/// number to 0 would drop a first message numbered 0.
#[derive(Debug, Clone)]
pub struct SeqCounter {
    next: u8,
}

impl Default for SeqCounter {
    fn default() -> Self {
        Self::starting_at(FIRST_SEQ)
    }
}

/// First number a default counter hands out.
pub const FIRST_SEQ: u8 = 1;

impl SeqCounter {
    /// Start counting at `first`.
    pub fn starting_at(first: u8) -> Self {
        Self { next: first }
    }

    /// Take the next sequence number.
    pub fn advance(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// The number the next call to [`advance`](Self::advance) returns.
    pub fn peek(&self) -> u8 {
        self.next
    }
}
