//! Notification contract for the clinic intake workflow.
//!
//! The intake engine treats outbound messages as fire-and-forget: it renders a
//! [`Notification`], hands it to a [`Notifier`], and only logs a
//! [`Delivery::Failed`] outcome. Nothing in here can roll back a workflow.

pub mod dispatch;
pub mod links;
pub mod templates;

pub use dispatch::*;
pub use links::*;
pub use templates::*;
