pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{AvailabilityRule, RuleSpec, ScheduleError, Slot};
pub use services::{AvailabilityService, ScheduleService};
