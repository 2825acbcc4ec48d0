//! Process lifecycle core
//!
//! Tree discovery, tree termination and the build-completion barrier.
//! The supervisor on top of these lives in `crate::supervisor`.

pub mod barrier;
pub mod models;
pub mod process_tree;
pub mod terminator;
