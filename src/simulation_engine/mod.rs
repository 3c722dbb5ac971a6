// simulation_engine/mod.rs
pub mod intersections;
pub mod mission_clock;
