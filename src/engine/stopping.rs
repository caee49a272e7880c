use serde::{Deserialize, Serialize};

use crate::execution::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Every target is archived at zero fitness
    AllCovered,
    IterationBudget,
    TimeBudget,
}

#[derive(Debug, Clone, Copy)]
pub struct StoppingConditions {
    pub max_iterations: Option<u64>,
    pub deadline: Deadline,
}

impl StoppingConditions {
    /// First condition that holds after `iterations` completed generations
    pub fn check(&self, iterations: u64, outstanding: usize) -> Option<TerminationReason> {
        if outstanding == 0 {
            Some(TerminationReason::AllCovered)
        } else if self.max_iterations.map_or(false, |max| iterations >= max) {
            Some(TerminationReason::IterationBudget)
        } else if self.deadline.expired() {
            Some(TerminationReason::TimeBudget)
        } else {
            None
        }
    }
}
