//! Compiled transform cache keyed by player script identifier

use crate::error::DecipherError;
use crate::platform::compiler::{CompiledPair, ExecutableUnit, UnitCompiler};
use crate::platform::locator::{ExtractedRoutine, FunctionLocator};
use crate::platform::script::ScriptFetcher;
use crate::utils::cache::SingleSlotCache;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Holds the compiled pair for the most recently requested script.
///
/// Concurrent requests for an identifier share a single fetch and extraction.
/// Requesting a different identifier replaces the entry.
pub struct TransformCache {
    fetcher: Arc<dyn ScriptFetcher>,
    locator: FunctionLocator,
    compiler: UnitCompiler,
    slot: SingleSlotCache<String, Arc<CompiledPair>>,
    extractions: AtomicUsize,
}

impl TransformCache {
    /// Create a new cache backed by `fetcher`
    pub fn new(fetcher: Arc<dyn ScriptFetcher>) -> Result<Self, DecipherError> {
        Ok(Self {
            fetcher,
            locator: FunctionLocator::new()?,
            compiler: UnitCompiler::new(),
            slot: SingleSlotCache::new(),
            extractions: AtomicUsize::new(0),
        })
    }

    /// Replace the compiler used for extracted routines
    pub fn with_compiler(mut self, compiler: UnitCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Compiled pair for `script_id`, fetching and extracting on a miss.
    ///
    /// Fetch errors are returned and leave the slot retryable. A script in
    /// which neither routine can be found yields an empty pair.
    pub async fn get_or_compile(&self, script_id: &str) -> Result<Arc<CompiledPair>, DecipherError> {
        if let Some(pair) = self.slot.get(&script_id.to_string()) {
            debug!("Transform cache hit for {}", script_id);
            return Ok(pair);
        }

        self.slot
            .get_or_try_insert_with(script_id.to_string(), || async move {
                info!("Extracting transforms from {}", script_id);
                let body = self.fetcher.fetch(script_id).await?;
                Ok(Arc::new(self.extract(&body)))
            })
            .await
    }

    /// Locate and compile both routines in a script body.
    ///
    /// Missing or uncompilable routines come back as `None`.
    pub fn extract(&self, body: &str) -> CompiledPair {
        self.extractions.fetch_add(1, Ordering::Relaxed);
        let (decipher, n_transform) = self.locator.locate(body);

        CompiledPair::new(
            decipher.and_then(|routine| self.compile(&routine)),
            n_transform.and_then(|routine| self.compile(&routine)),
        )
    }

    fn compile(&self, routine: &ExtractedRoutine) -> Option<ExecutableUnit> {
        match self.compiler.compile(routine) {
            Ok(unit) => Some(unit),
            Err(err) => {
                error!("{}", err);
                None
            }
        }
    }

    /// Number of script bodies extracted so far
    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::Relaxed)
    }

    /// Identifier currently held in the cache
    pub fn cached_script(&self) -> Option<String> {
        self.slot.key()
    }

    pub fn locator(&self) -> &FunctionLocator {
        &self.locator
    }

    pub fn clear(&self) {
        self.slot.clear();
    }
}
