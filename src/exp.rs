/// Represents a single experience or transition observed during one tick
///
/// Consumed by exactly one learner update and then dropped; nothing is replayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exp {
    /// The state index before the action was applied
    pub state: usize,
    /// The action taken in the given state
    pub action: usize,
    /// The reward measured after the action was applied
    pub reward: f64,
    /// The state index after the action was applied
    pub next_state: usize,
}
