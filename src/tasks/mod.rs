//! Background tasks module
//!
//! This module contains the tick task that drives a running session timer.

pub(crate) mod ticker;
