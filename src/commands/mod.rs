//! Command-line interface

pub mod parser;

pub use parser::*;
