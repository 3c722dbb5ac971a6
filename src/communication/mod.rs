// communication/mod.rs
pub mod amqp;
pub mod bus;
pub mod messages;
