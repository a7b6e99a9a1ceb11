//! Domain models for the intake engine.

mod appointment;
mod contact;
mod patient;
mod request;

pub use appointment::*;
pub use contact::*;
pub use patient::*;
pub use request::*;
