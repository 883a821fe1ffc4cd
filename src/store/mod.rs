// src/store/mod.rs

//! Persistent queue store: sequence directories, submission intake, event
//! files and reservation files.

pub mod events;
pub mod intake;
pub mod queue;
pub mod records;
pub mod reservations;

pub use events::QueueEvent;
pub use queue::QueueStore;
pub use reservations::StoredReservation;
