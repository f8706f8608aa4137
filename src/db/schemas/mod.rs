//! Database schemas for CivicConnect
//!
//! Defines MongoDB document structures for users, ideas, policies,
//! concerns, comments, notifications, and budget allocations.

mod budget_allocation;
mod comment;
mod concern;
mod idea;
mod metadata;
mod notification;
mod policy;
mod user;

pub use budget_allocation::{
    AllocationLine, BudgetAllocationDoc, PlanStatus, Tier, BUDGET_ALLOCATION_COLLECTION,
};
pub use comment::{CommentDoc, COMMENT_COLLECTION};
pub use concern::{
    ConcernComment, ConcernDoc, ConcernStatus, Coordinates, CONCERN_CATEGORIES, CONCERN_COLLECTION,
};
pub use idea::{
    BudgetStamp, EstimatedBudget, GovernmentResponse, IdeaDoc, IdeaPriority, IdeaStatus,
    IdeaTimeline, ImpactScope, Implementation, ImplementationUpdate, Visibility, IDEA_CATEGORIES,
    IDEA_COLLECTION,
};
pub use metadata::Metadata;
pub use notification::{NotificationDoc, NotificationType, NOTIFICATION_COLLECTION};
pub use policy::{PolicyDoc, PolicyStatus, POLICY_CATEGORIES, POLICY_COLLECTION};
pub use user::{default_avatar, Role, UserDoc, USER_COLLECTION};
