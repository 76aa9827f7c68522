//! Command line interface for ryt-decipher

pub mod args;

pub use args::*;
