//! Logic modules: decide what needs doing before anything is installed.
//!
//! # Modules
//!
//! - `dependency`: Dependency tree evaluation against local facts
//! - `resolver`: Stamps packages with applicability and install state

pub mod dependency;
pub mod resolver;
