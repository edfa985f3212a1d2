//! Method capture: registration, call-stack (`parentId`) tracking, and
//! `TraceEntry` assembly (C6).

use crate::redact::Redactor;
use crate::types::{ErrorInfo, Outcome, TraceEntry};
use crate::value::Value;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Names an intercepted call cannot register under: the interceptor's own
/// surface, kept out of the registration namespace (spec §4.6 exclusion
/// rules, extended here to this crate's own API since Rust has no
/// reflection over arbitrary struct methods to exclude instead).
const RESERVED: &[&str] = &["register", "call_sync_preserving", "call_async", "agent", "constructor"];

fn is_excluded(name: &str) -> bool {
    name.starts_with('_') || RESERVED.contains(&name)
}

/// A registered target: either a plain synchronous closure or one
/// returning a boxed future (Design Note §9's "registration API that
/// accepts `(name, function)` pairs" — a generated-wrapper-per-interface
/// alternative is not built, see `DESIGN.md`).
#[derive(Clone)]
pub enum RegisteredMethod {
    Sync(Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, ErrorInfo> + Send + Sync>),
    Async(Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, ErrorInfo>> + Send + Sync>),
}

impl RegisteredMethod {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, ErrorInfo> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, ErrorInfo>> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(f(args))))
    }
}

thread_local! {
    /// Stack of in-flight call ids on this executor worker, used to derive
    /// `parentId` for nested intercepted calls (spec §4.6). Valid under the
    /// single-threaded cooperative model of spec §5; see `SPEC_FULL.md` §4.6.
    static CALL_STACK: RefCell<Vec<Uuid>> = RefCell::new(Vec::new());
}

/// The signing/persist/anchor pipeline run after each call. Returns a
/// future so a blocking consistency mode (Sync) can be awaited inline and
/// have its failure surfaced to the caller (spec §4.7 scenario S3); modes
/// that anchor in the background resolve this future immediately with `Ok`.
pub type OnCompleteFn = Arc<dyn Fn(TraceEntry) -> BoxFuture<'static, crate::error::Result<()>> + Send + Sync>;

/// Wraps registered targets, assembling a `TraceEntry` per call and handing
/// it to `on_complete` (typically the signing/storage pipeline wired up by
/// `Wrapper`).
pub struct Interceptor {
    redactor: Arc<Redactor>,
    methods: RwLock<HashMap<String, RegisteredMethod>>,
    on_complete: OnCompleteFn,
}

impl Interceptor {
    pub fn new(redactor: Arc<Redactor>, on_complete: OnCompleteFn) -> Self {
        Self { redactor, methods: RwLock::new(HashMap::new()), on_complete }
    }

    /// Register `name` as an interceptable target. Rejects names starting
    /// with `_` and names reserved for this crate's own API.
    pub fn register(&self, name: &str, method: RegisteredMethod) -> crate::error::Result<()> {
        if is_excluded(name) {
            return Err(crate::error::Error::Configuration(format!("method name not interceptable: {name}")));
        }
        self.methods.write().insert(name.to_owned(), method);
        Ok(())
    }

    /// Invoke `name`, preserving synchronous calls as synchronous where the
    /// registered target itself is synchronous; a target registered async
    /// is awaited regardless (spec §4.6's "call_sync_preserving" mode,
    /// the default per `DESIGN.md`).
    pub async fn call_sync_preserving(&self, name: &str, args: Vec<Value>) -> std::result::Result<Value, ErrorInfo> {
        self.invoke(name, args).await
    }

    /// Invoke `name`, always through the async path (spec §4.6's
    /// "call_async" mode).
    pub async fn call_async(&self, name: &str, args: Vec<Value>) -> std::result::Result<Value, ErrorInfo> {
        self.invoke(name, args).await
    }

    async fn invoke(&self, name: &str, args: Vec<Value>) -> std::result::Result<Value, ErrorInfo> {
        let id = Uuid::new_v4();
        let parent_id = CALL_STACK.with(|stack| stack.borrow().last().copied());
        CALL_STACK.with(|stack| stack.borrow_mut().push(id));

        let method = self.methods.read().get(name).cloned();
        let start = crate::clock::now_millis();
        let result = match method {
            Some(RegisteredMethod::Sync(f)) => f(args.clone()),
            Some(RegisteredMethod::Async(f)) => f(args.clone()).await,
            None => Err(ErrorInfo::new("MethodNotFound", format!("no method registered: {name}"))),
        };
        let duration_ms = (crate::clock::now_millis() - start).max(0) as u64;

        CALL_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        let redacted_args = args.into_iter().map(|a| self.redactor.redact(a)).collect();
        let outcome = match &result {
            Ok(v) => Outcome::Result(self.redactor.redact(v.clone())),
            Err(e) => Outcome::Error(e.clone()),
        };
        let entry = TraceEntry {
            id,
            method: name.to_owned(),
            args: redacted_args,
            outcome,
            timestamp: start,
            duration_ms,
            parent_id,
        };
        match (self.on_complete)(entry).await {
            Ok(()) => result,
            // A blocking consistency mode (Sync) reported an anchor failure;
            // the call path raises even if the underlying method succeeded.
            Err(e) => Err(ErrorInfo::new("AnchorFailure", e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::RedactorConfig;
    use parking_lot::Mutex;

    fn interceptor(captured: Arc<Mutex<Vec<TraceEntry>>>) -> Interceptor {
        let redactor = Arc::new(Redactor::new(RedactorConfig::default()));
        let on_complete: OnCompleteFn = Arc::new(move |entry: TraceEntry| {
            captured.lock().push(entry);
            Box::pin(async { Ok(()) })
        });
        Interceptor::new(redactor, on_complete)
    }

    #[test]
    fn reserved_and_underscore_names_are_rejected() {
        let interceptor = interceptor(Arc::new(Mutex::new(Vec::new())));
        assert!(interceptor.register("_private", RegisteredMethod::sync(|_| Ok(Value::Null))).is_err());
        assert!(interceptor.register("register", RegisteredMethod::sync(|_| Ok(Value::Null))).is_err());
        assert!(interceptor.register("greet", RegisteredMethod::sync(|_| Ok(Value::Null))).is_ok());
    }

    #[tokio::test]
    async fn captures_args_result_and_timing() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let interceptor = interceptor(captured.clone());
        interceptor
            .register(
                "greet",
                RegisteredMethod::sync(|args| match &args[0] {
                    Value::String(name) => Ok(Value::String(format!("hi {name}"))),
                    _ => Err(ErrorInfo::new("TypeError", "expected string")),
                }),
            )
            .unwrap();

        let result = interceptor.call_sync_preserving("greet", vec![Value::String("Ada".into())]).await;
        assert_eq!(result, Ok(Value::String("hi Ada".into())));

        let entries = captured.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].method, "greet");
        assert_eq!(entries[0].outcome, Outcome::Result(Value::String("hi Ada".into())));
        assert!(entries[0].parent_id.is_none());
    }

    #[tokio::test]
    async fn nested_calls_record_parent_id() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let interceptor = Arc::new(interceptor(captured.clone()));
        let inner = interceptor.clone();
        interceptor
            .register("outer", RegisteredMethod::async_fn(move |_args| {
                let inner = inner.clone();
                async move {
                    inner.call_sync_preserving("inner", vec![]).await
                }
            }))
            .unwrap();
        interceptor.register("inner", RegisteredMethod::sync(|_| Ok(Value::Null))).unwrap();

        interceptor.call_sync_preserving("outer", vec![]).await.unwrap();

        let entries = captured.lock();
        assert_eq!(entries.len(), 2);
        let inner_entry = entries.iter().find(|e| e.method == "inner").unwrap();
        let outer_entry = entries.iter().find(|e| e.method == "outer").unwrap();
        assert_eq!(inner_entry.parent_id, Some(outer_entry.id));
    }

    #[tokio::test]
    async fn calling_unregistered_method_produces_error_and_entry() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let interceptor = interceptor(captured.clone());
        let result = interceptor.call_sync_preserving("missing", vec![]).await;
        assert!(result.is_err());
        assert_eq!(captured.lock().len(), 1);
    }

    #[tokio::test]
    async fn on_complete_failure_overrides_a_successful_result() {
        let redactor = Arc::new(Redactor::new(RedactorConfig::default()));
        let on_complete: OnCompleteFn = Arc::new(|_entry| {
            Box::pin(async {
                Err(crate::error::Error::AnchorFailure { message: "rpc down".into(), retry_count: 1 })
            })
        });
        let interceptor = Interceptor::new(redactor, on_complete);
        interceptor.register("greet", RegisteredMethod::sync(|_| Ok(Value::String("hi".into())))).unwrap();

        let result = interceptor.call_sync_preserving("greet", vec![]).await;
        let err = result.unwrap_err();
        assert_eq!(err.name, "AnchorFailure");
        assert!(err.message.contains("rpc down"));
    }

    #[tokio::test]
    async fn args_and_result_are_redacted_in_the_captured_entry_but_not_in_the_return_value() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let interceptor = interceptor(captured.clone());
        interceptor
            .register("echo", RegisteredMethod::sync(|args| Ok(args[0].clone())))
            .unwrap();
        let ssn = Value::String("123-45-6789".into());
        let result = interceptor.call_sync_preserving("echo", vec![ssn.clone()]).await;
        assert_eq!(result, Ok(ssn));

        let entries = captured.lock();
        assert_eq!(entries[0].args[0], Value::String("[REDACTED]".into()));
        assert_eq!(entries[0].outcome, Outcome::Result(Value::String("[REDACTED]".into())));
    }
}
