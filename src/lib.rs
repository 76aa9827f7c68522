//! # ryt-decipher
//!
//! Signature and n-parameter resolution for YouTube stream URLs.
//!
//! ## Features
//!
//! - Locates the decipher and n-transform routines in a player script
//! - Runs each routine in its own V8 isolate
//! - Caches the compiled routines of the current player script
//! - Resolves `signatureCipher` formats into direct URLs
//!
//! ## Example
//!
//! ```rust,no_run
//! use ryt_decipher::{Cipher, FormatDescriptor, HttpScriptFetcher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cipher = Cipher::new(Arc::new(HttpScriptFetcher::new()?))?;
//!
//!     let formats: Vec<FormatDescriptor> = serde_json::from_str(r#"[{"itag":18,"url":"https://example.com/v?n=abc"}]"#)?;
//!     let resolved = cipher
//!         .decipher_formats(formats, "/s/player/abc/player_ias.vflset/en_US/base.js")
//!         .await;
//!
//!     for url in resolved.keys() {
//!         println!("{}", url);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod core;
pub mod error;
pub mod platform;
pub mod utils;

// Re-export main types
pub use self::core::FormatDescriptor;
pub use error::DecipherError;
pub use platform::{
    Cipher, CompiledPair, ExecutableUnit, FetchConfig, FileScriptFetcher, FunctionLocator,
    HttpScriptFetcher, NTransformStatus, RoutineKind, ScriptFetcher, TransformCache, UnitCompiler,
};

/// Result type alias for ryt-decipher operations
pub type Result<T> = std::result::Result<T, DecipherError>;
