// lib.rs
pub mod communication;
pub mod config;
pub mod control_system;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod geodata;
pub mod global_variables;
pub mod monitoring;
pub mod orchestration;
pub mod shared_data;
pub mod simulation_engine;
