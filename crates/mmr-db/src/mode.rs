/// Where a write originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyMode {
    /// A client write on this node. Gets a fresh local event.
    Local,
    /// A write replayed from another node. Carries its own stamp.
    Remote,
}

impl ApplyMode {
    pub fn is_local(&self) -> bool {
        matches!(self, ApplyMode::Local)
    }
}
