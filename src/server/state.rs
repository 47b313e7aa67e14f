use serde::{Deserialize, Serialize};

/// Lifecycle of a server column. The order matters: "at least Loaded"
/// compares with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnState {
    New,
    ShouldPopulate,
    Populating,
    Populated,
    Border,
    Loaded,
    Sendable,
}

/// What the transition function may look at besides the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub population_complete: bool,
    /// States of the 8 surrounding columns, `None` where not resident.
    pub neighbors: [Option<ColumnState>; 8],
}

impl TransitionContext {
    pub fn new(population_complete: bool, neighbors: [Option<ColumnState>; 8]) -> Self {
        Self {
            population_complete,
            neighbors,
        }
    }

    pub fn all_present(&self) -> bool {
        self.neighbors.iter().all(Option::is_some)
    }

    pub fn all_at_least(&self, state: ColumnState) -> bool {
        self.neighbors.iter().all(|n| n.map_or(false, |s| s >= state))
    }
}

/// One step of the column lifecycle. Returns `state` unchanged when no
/// rule applies; callers loop until the result stops changing.
pub fn next_state(state: ColumnState, ctx: &TransitionContext) -> ColumnState {
    use ColumnState::*;

    match state {
        New => ShouldPopulate,
        ShouldPopulate => Populating,
        Populating if ctx.population_complete => Populated,
        Populating => Populating,
        Populated if ctx.all_present() => Border,
        Populated => Populated,
        Border if ctx.all_at_least(Populated) => Loaded,
        Border => Border,
        Loaded | Sendable if !ctx.all_present() => Border,
        Loaded if ctx.all_at_least(Loaded) => Sendable,
        Loaded => Loaded,
        Sendable if ctx.all_at_least(Loaded) => Sendable,
        Sendable => Loaded,
    }
}
