//! FIFO admission control for a forecast service that owns one exclusive
//! accelerator.
//!
//! Every call takes a [`ticket::Ticket`], waits in [`scheduler::Gate`] until it
//! is at the head of the queue and the device is free, runs its forecast
//! through [`runner::IsolatedExecutor`], and gives the device back when its
//! [`scheduler::TicketGuard`] drops.

pub mod config;
pub mod errors;
pub mod forecast;
pub mod handlers;
pub mod orchestrator;
pub mod resource;
pub mod runner;
pub mod scheduler;
pub mod ticket;
