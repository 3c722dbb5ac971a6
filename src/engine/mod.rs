// engine/mod.rs
pub mod scheduler;
