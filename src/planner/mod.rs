//! Budget-planner pipeline: scoring, fitting, approval fan-out

pub mod approve;
pub mod pipeline;
pub mod prompts;

pub use approve::{fund_allocated_ideas, FanOutReport};
pub use pipeline::{
    fit_to_cap, BudgetPlanner, InsufficiencyReport, PlanDraft, PlannerOutcome, PlannerSettings,
};
pub use prompts::{crore, lakh, CompactIdea};
