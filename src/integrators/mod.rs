//! The integration routines.

pub mod vegas;
