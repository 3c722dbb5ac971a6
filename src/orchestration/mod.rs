// orchestration/mod.rs
pub mod mission_plan;
pub mod planner;
