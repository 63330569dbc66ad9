//! Domain models for disaster-service.

pub mod report;
pub mod subscription;
pub mod user;

pub use report::{DisasterReport, NewReport, ReportChanges, ReportFilter, ReportStatus, Severity};
pub use subscription::{Subscriber, Subscription, SubscriptionInput};
pub use user::{AuthProvider, NewUser, User, UserResponse, ROLE_ADMIN, ROLE_PUBLIC};
