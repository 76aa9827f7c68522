//! Player script extraction and format URL resolution

pub mod patterns;
pub mod locator;
pub mod compiler;
pub mod script;
pub mod transforms;
pub mod cipher;

#[cfg(test)]
pub(crate) mod fixtures;

pub use patterns::*;
pub use locator::*;
pub use compiler::*;
pub use script::*;
pub use transforms::*;
pub use cipher::*;
