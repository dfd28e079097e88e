//! Synchronization primitives built on the thread core.
//!
//! Nothing here has its own blocking machinery: locks, condition variables,
//! and the rendezvous channel are assembled entirely from wait sets in the
//! scheduler table plus the kernel's sleep/ready/dispatch operations, under
//! the interrupts-disabled discipline. There is no separate locking layer
//! beneath them.

mod condition;
mod lock;
mod rendezvous;

pub use condition::Condition;
pub use lock::Lock;
pub use rendezvous::Rendezvous;
