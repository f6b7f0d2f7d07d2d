//! Internal helper functions and utilities.
//!
//! This module contains shared rpgp plumbing that is not part of the
//! public API.

mod helpers;
mod policy;

pub(crate) use helpers::*;
pub(crate) use policy::*;
