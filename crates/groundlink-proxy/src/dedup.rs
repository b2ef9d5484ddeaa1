/// First-copy-wins filter over frames arriving on several diversity links.
///
/// Only the most recently accepted sequence number is remembered. A copy
/// that arrives after a newer frame was accepted is delivered again, so
/// reordering between links can produce duplicates downstream.
#[derive(Debug, Clone, Default)]
pub struct DiversityFilter {
    last_accepted: Option<u8>,
}

impl DiversityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the frame should be delivered.
    ///
    /// The first frame is always accepted.
    pub fn accept(&mut self, seq: u8) -> bool {
        if self.last_accepted == Some(seq) {
            return false;
        }
        self.last_accepted = Some(seq);
        true
    }

    pub fn last_accepted(&self) -> Option<u8> {
        self.last_accepted
    }
}
