//! Signature and n-parameter resolution for streaming formats

use crate::core::format::FormatDescriptor;
use crate::error::DecipherError;
use crate::platform::compiler::{CompiledPair, ExecutableUnit};
use crate::platform::locator::RoutineKind;
use crate::platform::script::ScriptFetcher;
use crate::platform::transforms::TransformCache;
use crate::utils::url::{decode_component, parse_query, query_param, set_query_param};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

/// Prefix an n-transform result carries when the routine caught an exception
pub const N_EXCEPTION_PREFIX: &str = "enhanced_except_";

/// Suffix marker (followed by the input) of the same fallback in newer scripts
pub const N_EXCEPTION_SUFFIX: &str = "_w8_";

/// Query parameter a deciphered signature goes into when `sp` is absent
const DEFAULT_SIGNATURE_PARAM: &str = "sig";

/// Outcome of the n-parameter step for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NTransformStatus {
    /// No `n` parameter or no n-transform unit
    Skipped,
    /// `n` replaced with a new value
    Transformed,
    /// Routine returned its input; set anyway
    Unchanged,
    /// Routine returned its exception fallback; set anyway
    ExceptionFallback,
    /// Routine returned nothing; `n` left as it was
    Empty,
    /// The step raised; URL left as it was
    Failed,
}

/// Classify an n-transform result against its input
pub fn classify_n_result(n: &str, transformed: Option<&str>) -> NTransformStatus {
    match transformed {
        None | Some("") => NTransformStatus::Empty,
        Some(value) if value == n => NTransformStatus::Unchanged,
        Some(value)
            if value.starts_with(N_EXCEPTION_PREFIX)
                || value.ends_with(&format!("{N_EXCEPTION_SUFFIX}{n}")) =>
        {
            NTransformStatus::ExceptionFallback
        }
        Some(_) => NTransformStatus::Transformed,
    }
}

/// Resolve the download URL of one format in place.
///
/// Ciphered formats get their signature deciphered, then the `n` parameter of
/// the resulting URL is transformed. On success the encoded fields are
/// removed. Formats without any URL material are left untouched. Failures are
/// logged and leave the URL as it was before the failing step.
pub fn set_download_url(format: &mut FormatDescriptor, pair: &CompiledPair) {
    let ciphered = format.direct_url().is_none();
    let source = match format.direct_url().or_else(|| format.cipher_bundle()) {
        Some(source) => source.to_string(),
        None => return,
    };

    let url = if ciphered {
        decipher_url(&source, pair.decipher.as_ref())
    } else {
        Some(source)
    };

    format.url = url.map(|url| transform_n_url(&url, pair.n_transform.as_ref()).0);
    format.signature_cipher = None;
    format.cipher = None;
}

/// Recover the URL from a cipher bundle, applying the decipher unit when the
/// bundle carries a signature.
pub fn decipher_url(bundle: &str, unit: Option<&ExecutableUnit>) -> Option<String> {
    let args = parse_query(bundle);
    let url = args.get("url").cloned();

    let (signature, unit) = match (args.get("s").filter(|s| !s.is_empty()), unit) {
        (Some(signature), Some(unit)) => (signature, unit),
        _ => return url,
    };

    match apply_signature(&args, signature, unit) {
        Ok(resolved) => Some(resolved),
        Err(err) => {
            error!("Error applying decipher: {}", err);
            url
        }
    }
}

fn apply_signature(
    args: &HashMap<String, String>,
    signature: &str,
    unit: &ExecutableUnit,
) -> Result<String, DecipherError> {
    let raw_url = args.get("url").map(String::as_str).unwrap_or_default();
    let mut url = Url::parse(&decode_component(raw_url)?)?;

    let deciphered = unit
        .invoke(&decode_component(signature)?)?
        .ok_or_else(|| DecipherError::RuntimeFailure {
            kind: unit.kind(),
            message: "routine returned no value".to_string(),
        })?;

    let param = args
        .get("sp")
        .map(String::as_str)
        .filter(|sp| !sp.is_empty())
        .unwrap_or(DEFAULT_SIGNATURE_PARAM);
    set_query_param(&mut url, param, &deciphered);
    Ok(url.into())
}

/// Run the `n` parameter of `url` through the n-transform unit
pub fn transform_n_url(url: &str, unit: Option<&ExecutableUnit>) -> (String, NTransformStatus) {
    match apply_n_transform(url, unit) {
        Ok(result) => result,
        Err(err) => {
            error!("Error applying n transform: {}", err);
            (url.to_string(), NTransformStatus::Failed)
        }
    }
}

fn apply_n_transform(
    url: &str,
    unit: Option<&ExecutableUnit>,
) -> Result<(String, NTransformStatus), DecipherError> {
    let mut components = Url::parse(&decode_component(url)?)?;

    let (n, unit) = match (query_param(&components, "n").filter(|n| !n.is_empty()), unit) {
        (Some(n), Some(unit)) => (n, unit),
        _ => return Ok((url.to_string(), NTransformStatus::Skipped)),
    };

    let transformed = unit.invoke(&n)?;
    let status = classify_n_result(&n, transformed.as_deref());
    match status {
        NTransformStatus::Unchanged => {
            warn!("Transformed n parameter is the same as input, n function possibly short-circuited")
        }
        NTransformStatus::ExceptionFallback => {
            warn!("N function did not complete due to exception")
        }
        NTransformStatus::Empty => {
            warn!("Transformed n parameter is empty, n function possibly faulty")
        }
        _ => {}
    }

    if let Some(value) = transformed.filter(|value| !value.is_empty()) {
        set_query_param(&mut components, "n", &value);
    }
    Ok((components.into(), status))
}

/// Resolve every format against an already compiled pair.
///
/// Only formats ending with a non-empty URL are returned, keyed by that URL.
/// A later duplicate replaces the earlier record but keeps its position.
pub fn resolve_formats(
    formats: impl IntoIterator<Item = FormatDescriptor>,
    pair: &CompiledPair,
) -> IndexMap<String, FormatDescriptor> {
    let mut resolved = IndexMap::new();
    for mut format in formats {
        set_download_url(&mut format, pair);
        if let Some(url) = format.direct_url().map(str::to_string) {
            resolved.insert(url, format);
        }
    }
    resolved
}

/// Resolves format URLs using transforms extracted from player scripts
pub struct Cipher {
    transforms: TransformCache,
}

impl Cipher {
    /// Create a new cipher fetching scripts through `fetcher`
    pub fn new(fetcher: Arc<dyn ScriptFetcher>) -> Result<Self, DecipherError> {
        Ok(Self::with_transforms(TransformCache::new(fetcher)?))
    }

    pub fn with_transforms(transforms: TransformCache) -> Self {
        Self { transforms }
    }

    pub fn transforms(&self) -> &TransformCache {
        &self.transforms
    }

    /// Resolve a batch of formats against the script `script_id`.
    ///
    /// A failure to obtain the transforms yields an empty map.
    pub async fn decipher_formats(
        &self,
        formats: Vec<FormatDescriptor>,
        script_id: &str,
    ) -> IndexMap<String, FormatDescriptor> {
        let pair = match self.transforms.get_or_compile(script_id).await {
            Ok(pair) => pair,
            Err(err) => {
                error!("Error deciphering formats: {}", err);
                return IndexMap::new();
            }
        };

        let total = formats.len();
        let resolved = resolve_formats(formats, &pair);
        debug!("Resolved {} of {} formats", resolved.len(), total);
        resolved
    }

    /// Decipher a single signature value
    pub async fn decipher_signature(
        &self,
        script_id: &str,
        signature: &str,
    ) -> Result<String, DecipherError> {
        let pair = self.transforms.get_or_compile(script_id).await?;
        invoke_required(pair.decipher.as_ref(), RoutineKind::Decipher, signature)
    }

    /// Transform a single n-parameter value
    pub async fn transform_n(&self, script_id: &str, n: &str) -> Result<String, DecipherError> {
        let pair = self.transforms.get_or_compile(script_id).await?;
        let transformed = invoke_required(pair.n_transform.as_ref(), RoutineKind::NTransform, n)?;

        match classify_n_result(n, Some(&transformed)) {
            NTransformStatus::Unchanged => warn!("Transformed n parameter is the same as input"),
            NTransformStatus::ExceptionFallback => warn!("N function did not complete due to exception"),
            _ => {}
        }
        Ok(transformed)
    }
}

fn invoke_required(
    unit: Option<&ExecutableUnit>,
    kind: RoutineKind,
    input: &str,
) -> Result<String, DecipherError> {
    let unit = unit.ok_or(DecipherError::ExtractionFailure(kind))?;
    unit.invoke(input)?.ok_or_else(|| DecipherError::RuntimeFailure {
        kind,
        message: "routine returned no value".to_string(),
    })
}
