//! Locating the decipher and n-transform routines inside a player script

use crate::error::DecipherError;
use crate::platform::patterns::PatternLibrary;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Which of the two player routines a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutineKind {
    /// Signature decipher
    Decipher,
    /// n-parameter transform
    NTransform,
}

impl RoutineKind {
    /// Canonical name the routine is bound to inside its executable unit
    pub fn entry_point(&self) -> &'static str {
        match self {
            RoutineKind::Decipher => "DECIPHER_FUNC",
            RoutineKind::NTransform => "N_TRANSFORM_FUNC",
        }
    }

    /// Name of the single input binding
    pub fn argument(&self) -> &'static str {
        match self {
            RoutineKind::Decipher => "sig",
            RoutineKind::NTransform => "ncode",
        }
    }
}

impl fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutineKind::Decipher => write!(f, "decipher"),
            RoutineKind::NTransform => write!(f, "n-transform"),
        }
    }
}

/// Obfuscation variant a routine was recognised as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeVariant {
    Standard,
    /// Helper access and split/join arguments go through global lookup tables
    Tce,
}

/// Helper object keys recovered per primitive operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperKeys {
    pub reverse: Option<String>,
    pub slice: Option<String>,
    pub splice: Option<String>,
    pub swap: Option<String>,
}

impl HelperKeys {
    /// Recovered keys escaped for literal reuse inside a pattern
    pub fn escaped(&self) -> Vec<String> {
        [&self.reverse, &self.slice, &self.splice, &self.swap]
            .into_iter()
            .flatten()
            .map(|key| regex::escape(key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.escaped().is_empty()
    }
}

/// Verbatim routine text plus the declarations it needs to run on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRoutine {
    pub kind: RoutineKind,
    pub shape: ShapeVariant,
    /// Function expression text
    pub source: String,
    /// Statements emitted ahead of the routine, in order
    pub dependencies: Vec<String>,
    /// Helper keys found for a decipher routine
    pub helper_keys: Option<HelperKeys>,
}

impl ExtractedRoutine {
    pub fn new(kind: RoutineKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            shape: ShapeVariant::Standard,
            source: source.into(),
            dependencies: Vec::new(),
            helper_keys: None,
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Self-contained script: dependencies, the routine bound to its entry
    /// point, and a trailing call with the input binding.
    pub fn assemble(&self) -> String {
        let entry = self.kind.entry_point();
        let mut script = String::new();
        for dependency in &self.dependencies {
            script.push_str(dependency);
            script.push('\n');
        }
        script.push_str(&format!("var {}={};\n", entry, self.source));
        script.push_str(&format!("{}({});", entry, self.kind.argument()));
        script
    }
}

/// Remembers which script bodies already produced an extraction warning
#[derive(Default)]
struct FailureLatch {
    reported: Mutex<HashMap<RoutineKind, u64>>,
    count: AtomicUsize,
}

impl FailureLatch {
    fn should_report(&self, kind: RoutineKind, body: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        let fingerprint = hasher.finish();

        let mut reported = self.reported.lock().unwrap_or_else(|e| e.into_inner());
        if reported.insert(kind, fingerprint) == Some(fingerprint) {
            return false;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Finds the routines in a script body using the [`PatternLibrary`]
pub struct FunctionLocator {
    patterns: PatternLibrary,
    latch: FailureLatch,
}

impl FunctionLocator {
    /// Create a new locator
    pub fn new() -> Result<Self, DecipherError> {
        Ok(Self {
            patterns: PatternLibrary::new()?,
            latch: FailureLatch::default(),
        })
    }

    /// Locate both routines; a missing routine is reported and comes back as `None`
    pub fn locate(&self, body: &str) -> (Option<ExtractedRoutine>, Option<ExtractedRoutine>) {
        (self.locate_decipher(body), self.locate_n_transform(body))
    }

    pub fn locate_decipher(&self, body: &str) -> Option<ExtractedRoutine> {
        self.recover(RoutineKind::Decipher, body, self.extract_decipher(body))
    }

    pub fn locate_n_transform(&self, body: &str) -> Option<ExtractedRoutine> {
        // Optional: downloads still work without it, only throttled
        self.recover(RoutineKind::NTransform, body, self.extract_n_transform(body))
    }

    /// Number of extraction warnings emitted so far
    pub fn failure_reports(&self) -> usize {
        self.latch.count.load(Ordering::Relaxed)
    }

    fn recover(
        &self,
        kind: RoutineKind,
        body: &str,
        result: Result<ExtractedRoutine, DecipherError>,
    ) -> Option<ExtractedRoutine> {
        match result {
            Ok(routine) => Some(routine),
            Err(err) => {
                if self.latch.should_report(kind, body) {
                    warn!("Could not parse {} function: {}", kind, err);
                } else {
                    debug!("Skipping repeated {} extraction warning", kind);
                }
                None
            }
        }
    }

    /// Extract the signature decipher routine with its helper object
    pub fn extract_decipher(&self, body: &str) -> Result<ExtractedRoutine, DecipherError> {
        let missing = || DecipherError::ExtractionFailure(RoutineKind::Decipher);
        let patterns = &self.patterns;

        let helper = patterns.helper_object.captures(body).ok_or_else(missing)?;
        let helper_object = helper.get(0).ok_or_else(missing)?.as_str();
        let actions = helper.get(2).ok_or_else(missing)?.as_str();

        let keys = HelperKeys {
            reverse: first_group(&patterns.reverse_key, actions),
            slice: first_group(&patterns.slice_key, actions),
            splice: first_group(&patterns.splice_key, actions),
            swap: first_group(&patterns.swap_key, actions),
        };
        if keys.is_empty() {
            return Err(missing());
        }
        debug!(
            "Found helper object {} with keys {:?}",
            helper.get(1).map_or("", |m| m.as_str()),
            keys.escaped()
        );

        let (source, shape) = match patterns.decipher.find(body)? {
            Some(source) => (source, ShapeVariant::Standard),
            None => match patterns.decipher_tce.find(body) {
                Some(found) => (found.as_str(), ShapeVariant::Tce),
                None => return Err(missing()),
            },
        };

        let mut dependencies = Vec::new();
        if shape == ShapeVariant::Tce {
            dependencies.extend(self.global_declarations(body));
        }
        dependencies.push(helper_object.to_string());

        Ok(ExtractedRoutine {
            kind: RoutineKind::Decipher,
            shape,
            source: source.to_string(),
            dependencies,
            helper_keys: Some(keys),
        })
    }

    /// Extract the n-parameter transform routine, stripped of its host guard
    pub fn extract_n_transform(&self, body: &str) -> Result<ExtractedRoutine, DecipherError> {
        let missing = || DecipherError::ExtractionFailure(RoutineKind::NTransform);
        let patterns = &self.patterns;

        let (source, shape) = match patterns.n_transform.find(body)? {
            Some(source) => (source, ShapeVariant::Standard),
            None => match patterns.n_transform_tce.find(body)? {
                Some(source) => (source, ShapeVariant::Tce),
                None => return Err(missing()),
            },
        };

        let param = first_group(&patterns.parameter, source).ok_or_else(missing)?;
        let cleaned = patterns
            .typeof_guard(&param)?
            .replace_all(source, "")
            .into_owned();

        let mut dependencies = Vec::new();
        if shape == ShapeVariant::Tce {
            dependencies.extend(self.global_declarations(body));
        }

        Ok(ExtractedRoutine {
            kind: RoutineKind::NTransform,
            shape,
            source: cleaned,
            dependencies,
            helper_keys: None,
        })
    }

    fn global_declarations(&self, body: &str) -> Option<String> {
        let declaration = first_group(&self.patterns.global_vars, body)?;
        Some(format!("{};", declaration))
    }
}

fn first_group(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fixtures::{
        NAMED_PLAYER, SLICE_PLAYER, STANDARD_PLAYER, TCE_PLAYER, UNPARSABLE_PLAYER,
    };

    #[test]
    fn test_extract_standard_decipher() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_decipher(STANDARD_PLAYER).unwrap();

        assert_eq!(routine.kind, RoutineKind::Decipher);
        assert_eq!(routine.shape, ShapeVariant::Standard);
        assert_eq!(
            routine.source,
            r#"function(a){a=a.split("");Xy.ab(a,7);Xy.cd(a,2);Xy.ef(a,3);return a.join("")}"#
        );
        assert_eq!(routine.dependencies.len(), 1);
        assert!(routine.dependencies[0].starts_with("var Xy={ab:function(a){a.reverse()},"));

        let keys = routine.helper_keys.unwrap();
        assert_eq!(keys.reverse.as_deref(), Some("ab"));
        assert_eq!(keys.splice.as_deref(), Some("cd"));
        assert_eq!(keys.swap.as_deref(), Some("ef"));
        assert_eq!(keys.slice.as_deref(), Some("gh"));
    }

    #[test]
    fn test_extract_slice_decipher() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_decipher(SLICE_PLAYER).unwrap();

        let keys = routine.helper_keys.as_ref().unwrap();
        assert_eq!(keys.reverse.as_deref(), Some("$r"));
        assert_eq!(keys.slice.as_deref(), Some("s1"));
        assert_eq!(keys.splice, None);
        assert_eq!(keys.swap, None);
        assert_eq!(keys.escaped(), vec![r"\$r".to_string(), "s1".to_string()]);
    }

    #[test]
    fn test_extract_standard_n_transform_strips_guard() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_n_transform(STANDARD_PLAYER).unwrap();

        assert_eq!(routine.kind, RoutineKind::NTransform);
        assert_eq!(routine.shape, ShapeVariant::Standard);
        assert!(routine.source.starts_with("function(a){var b=a.split(\"\"),c=["));
        assert!(!routine.source.contains("typeof"));
        assert!(routine.source.ends_with("return b.join(\"\")};"));
        assert!(routine.dependencies.is_empty());
    }

    #[test]
    fn test_extract_tce_routines_capture_globals() {
        let locator = FunctionLocator::new().unwrap();

        let decipher = locator.extract_decipher(TCE_PLAYER).unwrap();
        assert_eq!(decipher.shape, ShapeVariant::Tce);
        assert_eq!(
            decipher.dependencies[0],
            r#"var Kq=";;reverse;_w8_".split(";");"#
        );
        assert!(decipher.dependencies[1].starts_with("var Xy={"));

        let n_transform = locator.extract_n_transform(TCE_PLAYER).unwrap();
        assert_eq!(n_transform.shape, ShapeVariant::Tce);
        assert_eq!(
            n_transform.dependencies,
            vec![r#"var Kq=";;reverse;_w8_".split(";");"#.to_string()]
        );
    }

    #[test]
    fn test_extract_named_decipher_and_call_style_n_transform() {
        let locator = FunctionLocator::new().unwrap();

        let decipher = locator.extract_decipher(NAMED_PLAYER).unwrap();
        assert_eq!(decipher.shape, ShapeVariant::Standard);
        assert_eq!(
            decipher.source,
            r#"function Vz(a){a=a.split("");Xy.ab(a,1);Xy.cd(a,2);return a.join("")}"#
        );

        let n_transform = locator.extract_n_transform(NAMED_PLAYER).unwrap();
        assert_eq!(n_transform.shape, ShapeVariant::Standard);
        assert!(n_transform
            .source
            .starts_with("function(a){var b=String.prototype.split.call(a,\"\"),"));
        assert!(n_transform
            .source
            .ends_with("return Array.prototype.join.call(b,\"\")};"));
    }

    #[test]
    fn test_assemble() {
        let routine = ExtractedRoutine::new(RoutineKind::NTransform, "function(a){return a}")
            .with_dependency("var t=[1];");

        assert_eq!(
            routine.assemble(),
            "var t=[1];\nvar N_TRANSFORM_FUNC=function(a){return a};\nN_TRANSFORM_FUNC(ncode);"
        );
    }

    #[test]
    fn test_unparsable_script_reports_once() {
        let locator = FunctionLocator::new().unwrap();

        for _ in 0..5 {
            let (decipher, n_transform) = locator.locate(UNPARSABLE_PLAYER);
            assert!(decipher.is_none());
            assert!(n_transform.is_none());
        }

        // One report per routine kind
        assert_eq!(locator.failure_reports(), 2);
    }

    #[test]
    fn test_different_unparsable_script_reports_again() {
        let locator = FunctionLocator::new().unwrap();

        assert!(locator.locate_decipher(UNPARSABLE_PLAYER).is_none());
        assert!(locator.locate_decipher(UNPARSABLE_PLAYER).is_none());
        assert_eq!(locator.failure_reports(), 1);

        assert!(locator.locate_decipher("var nothing=here;").is_none());
        assert_eq!(locator.failure_reports(), 2);
    }

    #[test]
    fn test_missing_helper_object() {
        let locator = FunctionLocator::new().unwrap();
        let body = r#"Vz=function(a){a=a.split("");Xy.ab(a,7);return a.join("")};"#;

        let err = locator.extract_decipher(body).unwrap_err();
        assert!(matches!(
            err,
            DecipherError::ExtractionFailure(RoutineKind::Decipher)
        ));
    }
}
