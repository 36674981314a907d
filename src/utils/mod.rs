//! Binary support helpers.

pub mod bootstrap;
