// dashboard/mod.rs
pub mod app;
pub mod console;
pub mod runtime;

pub use app::{Dashboard, DashboardEvent, Effect, MissionState, UserAction};
pub use runtime::run_dashboard;
