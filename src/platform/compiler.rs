//! Turning extracted routines into isolated executable units

use crate::error::DecipherError;
use crate::platform::locator::{ExtractedRoutine, RoutineKind};
use deno_core::{v8, JsRuntime, RuntimeOptions};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Text rewrite applied to an assembled routine before compilation
pub type PostProcess = dyn Fn(String) -> String + Send + Sync;

type InvokeResult = Result<Option<String>, DecipherError>;

struct Invocation {
    input: String,
    reply: Sender<InvokeResult>,
}

#[derive(Default)]
struct UnitStats {
    compilations: AtomicUsize,
    invocations: AtomicUsize,
}

/// A compiled routine, invocable any number of times.
///
/// The script is compiled once on a worker thread that owns the V8 isolate.
/// Each invocation binds it into a fresh context holding nothing but the
/// input binding and the routine's own declarations. Clones share the worker,
/// which stops when the last clone is dropped.
#[derive(Clone)]
pub struct ExecutableUnit {
    kind: RoutineKind,
    source: Arc<str>,
    jobs: Sender<Invocation>,
    stats: Arc<UnitStats>,
}

impl ExecutableUnit {
    fn spawn(kind: RoutineKind, source: String) -> Result<Self, DecipherError> {
        let source: Arc<str> = Arc::from(source);
        let stats = Arc::new(UnitStats::default());
        let (jobs, queue) = mpsc::channel();
        let (ready_tx, ready) = mpsc::sync_channel(1);

        {
            let source = source.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name(format!("{}-unit", kind))
                .spawn(move || run_worker(kind, &source, &stats, ready_tx, queue))?;
        }

        ready.recv().map_err(|_| DecipherError::CompileFailure {
            kind,
            message: "unit worker exited during compilation".to_string(),
        })??;

        Ok(Self {
            kind,
            source,
            jobs,
            stats,
        })
    }

    pub fn kind(&self) -> RoutineKind {
        self.kind
    }

    /// Assembled script text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the routine with `input` bound to its argument name.
    ///
    /// Returns `None` when the routine completes with `null` or `undefined`.
    pub fn invoke(&self, input: &str) -> Result<Option<String>, DecipherError> {
        let (reply, response) = mpsc::channel();
        self.jobs
            .send(Invocation {
                input: input.to_string(),
                reply,
            })
            .map_err(|_| self.worker_stopped())?;
        response.recv().map_err(|_| self.worker_stopped())?
    }

    /// Times the script was compiled
    pub fn compilations(&self) -> usize {
        self.stats.compilations.load(Ordering::Relaxed)
    }

    /// Invocations completed by the worker
    pub fn invocations(&self) -> usize {
        self.stats.invocations.load(Ordering::Relaxed)
    }

    fn worker_stopped(&self) -> DecipherError {
        DecipherError::RuntimeFailure {
            kind: self.kind,
            message: "unit worker stopped".to_string(),
        }
    }
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableUnit")
            .field("kind", &self.kind)
            .field("source_len", &self.source.len())
            .field("invocations", &self.invocations())
            .finish()
    }
}

fn run_worker(
    kind: RoutineKind,
    source: &str,
    stats: &UnitStats,
    ready: SyncSender<Result<(), DecipherError>>,
    queue: Receiver<Invocation>,
) {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    let script = match compile_unbound(&mut runtime, kind, source) {
        Ok(script) => script,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    stats.compilations.fetch_add(1, Ordering::Relaxed);
    let _ = ready.send(Ok(()));

    for invocation in queue {
        let result = run_in_fresh_context(&mut runtime, kind, &script, &invocation.input);
        stats.invocations.fetch_add(1, Ordering::Relaxed);
        let _ = invocation.reply.send(result);
    }
    debug!("{} unit worker stopped", kind);
}

/// Compile without running, unbound from any context
fn compile_unbound(
    runtime: &mut JsRuntime,
    kind: RoutineKind,
    source: &str,
) -> Result<v8::Global<v8::UnboundScript>, DecipherError> {
    let compile_error = |message: String| DecipherError::CompileFailure { kind, message };

    let scope = &mut runtime.handle_scope();
    let scope = &mut v8::TryCatch::new(scope);

    let code = v8::String::new(scope, source)
        .ok_or_else(|| compile_error("source does not fit in a V8 string".to_string()))?;
    let compiled = v8::script_compiler::compile_unbound_script(
        scope,
        v8::script_compiler::Source::new(code, None),
        v8::script_compiler::CompileOptions::NoCompileOptions,
        v8::script_compiler::NoCacheReason::NoReason,
    );

    match compiled {
        Some(script) => Ok(v8::Global::new(scope, script)),
        None => {
            let message = scope
                .exception()
                .map(|exception| exception.to_rust_string_lossy(scope))
                .unwrap_or_else(|| "unknown syntax error".to_string());
            Err(compile_error(message))
        }
    }
}

fn run_in_fresh_context(
    runtime: &mut JsRuntime,
    kind: RoutineKind,
    script: &v8::Global<v8::UnboundScript>,
    input: &str,
) -> InvokeResult {
    let runtime_error = |message: String| DecipherError::RuntimeFailure { kind, message };

    let scope = &mut runtime.handle_scope();
    let context = v8::Context::new(scope);
    let scope = &mut v8::ContextScope::new(scope, context);
    let scope = &mut v8::TryCatch::new(scope);

    let name = v8::String::new(scope, kind.argument())
        .ok_or_else(|| runtime_error("cannot allocate binding name".to_string()))?;
    let value = v8::String::new(scope, input)
        .ok_or_else(|| runtime_error("input does not fit in a V8 string".to_string()))?;
    context
        .global(scope)
        .set(scope, name.into(), value.into())
        .ok_or_else(|| runtime_error("cannot bind input".to_string()))?;

    let script = v8::Local::new(scope, script).bind_to_current_context(scope);
    match script.run(scope) {
        Some(result) if result.is_null_or_undefined() => Ok(None),
        Some(result) => Ok(Some(result.to_rust_string_lossy(scope))),
        None => {
            let message = scope
                .exception()
                .map(|exception| exception.to_rust_string_lossy(scope))
                .unwrap_or_else(|| "execution terminated".to_string());
            Err(runtime_error(message))
        }
    }
}

/// Decipher and n-transform units compiled from one player script.
///
/// Either half may be missing: without a decipher unit ciphered formats keep
/// their raw URL, without an n-transform unit downloads may be throttled.
#[derive(Debug, Clone, Default)]
pub struct CompiledPair {
    pub decipher: Option<ExecutableUnit>,
    pub n_transform: Option<ExecutableUnit>,
}

impl CompiledPair {
    pub fn new(decipher: Option<ExecutableUnit>, n_transform: Option<ExecutableUnit>) -> Self {
        Self {
            decipher,
            n_transform,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decipher.is_none() && self.n_transform.is_none()
    }
}

/// Compiles assembled routine text without running it
#[derive(Default)]
pub struct UnitCompiler {
    post_process: Option<Box<PostProcess>>,
}

impl UnitCompiler {
    /// Create a new compiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite assembled text before it is compiled
    pub fn with_post_process<F>(mut self, post_process: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.post_process = Some(Box::new(post_process));
        self
    }

    /// Assemble, optionally post-process, and compile a routine
    pub fn compile(&self, routine: &ExtractedRoutine) -> Result<ExecutableUnit, DecipherError> {
        let mut source = routine.assemble();
        if let Some(post_process) = &self.post_process {
            source = post_process(source);
        }

        let length = source.len();
        let unit = ExecutableUnit::spawn(routine.kind, source)?;
        debug!("Compiled {} unit ({} chars)", routine.kind, length);
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fixtures::{NAMED_PLAYER, SLICE_PLAYER, STANDARD_PLAYER, TCE_PLAYER};
    use crate::platform::locator::FunctionLocator;

    fn compile_source(kind: RoutineKind, source: &str) -> ExecutableUnit {
        UnitCompiler::new()
            .compile(&ExtractedRoutine::new(kind, source))
            .unwrap()
    }

    #[test]
    fn test_standard_decipher_unit() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_decipher(STANDARD_PLAYER).unwrap();
        let unit = UnitCompiler::new().compile(&routine).unwrap();

        // reverse, splice(0,2), swap(3)
        assert_eq!(unit.invoke("abcdefghij").unwrap().as_deref(), Some("egfhdcba"));
        // Repeated invocations do not share state
        assert_eq!(unit.invoke("abcdefghij").unwrap().as_deref(), Some("egfhdcba"));
    }

    #[test]
    fn test_reverse_then_slice_unit() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_decipher(SLICE_PLAYER).unwrap();
        let unit = UnitCompiler::new().compile(&routine).unwrap();

        assert_eq!(unit.invoke("abcdef").unwrap().as_deref(), Some("dcba"));
    }

    #[test]
    fn test_standard_n_transform_unit_runs_past_guard() {
        let locator = FunctionLocator::new().unwrap();
        let routine = locator.extract_n_transform(STANDARD_PLAYER).unwrap();
        let unit = UnitCompiler::new().compile(&routine).unwrap();

        assert_eq!(unit.kind(), RoutineKind::NTransform);
        assert_eq!(unit.invoke("abc").unwrap().as_deref(), Some("cbax"));
    }

    #[test]
    fn test_tce_units_use_global_table() {
        let locator = FunctionLocator::new().unwrap();
        let (decipher, n_transform) = locator.locate(TCE_PLAYER);
        let compiler = UnitCompiler::new();

        let decipher = compiler.compile(&decipher.unwrap()).unwrap();
        assert_eq!(decipher.invoke("abcdef").unwrap().as_deref(), Some("edcba"));

        let n_transform = compiler.compile(&n_transform.unwrap()).unwrap();
        assert_eq!(n_transform.invoke("abc").unwrap().as_deref(), Some("cba"));
    }

    #[test]
    fn test_input_is_bound_literally() {
        let unit = compile_source(RoutineKind::Decipher, "function(a){return a}");
        let input = "quote\" back\\slash\n'single'";
        assert_eq!(unit.invoke(input).unwrap().as_deref(), Some(input));
    }

    #[test]
    fn test_undefined_result() {
        let unit = compile_source(RoutineKind::NTransform, "function(a){}");
        assert_eq!(unit.invoke("abc").unwrap(), None);
    }

    #[test]
    fn test_syntax_error_at_compile_time() {
        let err = UnitCompiler::new()
            .compile(&ExtractedRoutine::new(
                RoutineKind::Decipher,
                "function(a){return a.split(\"\"",
            ))
            .unwrap_err();

        assert!(matches!(
            err,
            DecipherError::CompileFailure {
                kind: RoutineKind::Decipher,
                ..
            }
        ));
    }

    #[test]
    fn test_compile_does_not_execute() {
        // Would throw if the trailing call ran during compilation
        let unit = compile_source(
            RoutineKind::Decipher,
            "function(a){throw new Error(\"ran\")}",
        );

        let err = unit.invoke("abc").unwrap_err();
        assert!(matches!(
            err,
            DecipherError::RuntimeFailure {
                kind: RoutineKind::Decipher,
                ..
            }
        ));
    }

    #[test]
    fn test_post_process() {
        let compiler = UnitCompiler::new()
            .with_post_process(|source| source.replace("return a", "return a+\"!\""));
        let unit = compiler
            .compile(&ExtractedRoutine::new(RoutineKind::Decipher, "function(a){return a}"))
            .unwrap();

        assert!(unit.source().contains("a+\"!\""));
        assert_eq!(unit.invoke("x").unwrap().as_deref(), Some("x!"));
    }

    #[test]
    fn test_named_decipher_and_call_style_n_transform() {
        let locator = FunctionLocator::new().unwrap();
        let (decipher, n_transform) = locator.locate(NAMED_PLAYER);
        let compiler = UnitCompiler::new();

        let decipher = compiler.compile(&decipher.unwrap()).unwrap();
        assert_eq!(decipher.invoke("abcdef").unwrap().as_deref(), Some("dcba"));

        let n_transform = compiler.compile(&n_transform.unwrap()).unwrap();
        assert_eq!(n_transform.invoke("abc").unwrap().as_deref(), Some("cbay"));
    }

    #[test]
    fn test_compiled_once_and_reused() {
        let unit = compile_source(
            RoutineKind::Decipher,
            r#"function(a){return a.split("").reverse().join("")}"#,
        );
        let clone = unit.clone();

        for _ in 0..10 {
            assert_eq!(unit.invoke("abc").unwrap().as_deref(), Some("cba"));
        }
        assert_eq!(clone.invoke("xyz").unwrap().as_deref(), Some("zyx"));

        assert_eq!(unit.compilations(), 1);
        assert_eq!(unit.invocations(), 11);
    }

    #[test]
    fn test_concurrent_invocations() {
        let unit = compile_source(
            RoutineKind::NTransform,
            r#"function(a){return a+"!"}"#,
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let unit = unit.clone();
                std::thread::spawn(move || unit.invoke(&i.to_string()).unwrap())
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Some(format!("{i}!")));
        }
        assert_eq!(unit.compilations(), 1);
    }

    #[test]
    fn test_each_invocation_gets_fresh_context() {
        let unit = compile_source(
            RoutineKind::Decipher,
            "function(a){globalThis.calls=(globalThis.calls||0)+1;return a+globalThis.calls}",
        );

        assert_eq!(unit.invoke("x").unwrap().as_deref(), Some("x1"));
        assert_eq!(unit.invoke("x").unwrap().as_deref(), Some("x1"));
    }

    #[test]
    fn test_host_globals_are_not_visible() {
        let unit = compile_source(
            RoutineKind::Decipher,
            r#"function(a){return [typeof Deno, typeof globalThis.__bootstrap, typeof sig].join(",")}"#,
        );

        assert_eq!(
            unit.invoke("abc").unwrap().as_deref(),
            Some("undefined,undefined,string")
        );
    }

    #[test]
    fn test_compiled_pair() {
        assert!(CompiledPair::default().is_empty());

        let unit = compile_source(RoutineKind::Decipher, "function(a){return a}");
        let pair = CompiledPair::new(Some(unit), None);
        assert!(!pair.is_empty());
    }
}
