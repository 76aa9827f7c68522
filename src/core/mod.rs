//! Core types for ryt-decipher

pub mod format;

pub use format::*;
