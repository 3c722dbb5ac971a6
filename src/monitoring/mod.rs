// monitoring/mod.rs
pub mod map_render;
pub mod mission_log;
