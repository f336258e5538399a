//! Job lifecycle control.
//!
//! Drives one job through start, extend ("align next") and stop, and keeps the
//! registry snapshot in sync through a cancellable polling loop per job.

mod controller;
mod poller;

pub use controller::JobController;
