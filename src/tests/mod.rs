//! Test suite.
//!
//! Pure structures (scheduler table, policies, alarm queue) are covered in
//! `unit`; everything that needs running threads sits in `integration` and
//! `stress` and requires the host machine.


#[cfg(feature = "host")]
mod helpers;
#[cfg(feature = "host")]
mod integration;
