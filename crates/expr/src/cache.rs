//! Compile-once expression cache.
//!
//! Compiled expressions are keyed by their source string and live for the
//! process lifetime. The cache is read-mostly: workers share one instance
//! behind an `Arc` and only the first evaluation of a given source takes
//! the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use fixgate_core::FixEnvelope;

use crate::binding::envelope_context;
use crate::error::ExprError;
use crate::eval::{self, Context};
use crate::parser::{parse, Expr};
use crate::value::Value;

/// An expression compiled to its AST.
#[derive(Debug)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.to_string(),
            ast: parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, ctx: &Context) -> Result<Value, ExprError> {
        eval::eval(&self.ast, ctx)
    }
}

/// Thread-safe insert-or-get cache of compiled expressions.
#[derive(Debug, Default)]
pub struct ExprCache {
    cache: RwLock<HashMap<String, Arc<CompiledExpr>>>,
    compile_count: AtomicU64,
}

impl ExprCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled form, compiling at most once per source string.
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<CompiledExpr>, ExprError> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = cache.get(source) {
                return Ok(found.clone());
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another worker may have compiled while we waited for the lock.
        if let Some(found) = cache.get(source) {
            return Ok(found.clone());
        }
        let compiled = Arc::new(CompiledExpr::compile(source)?);
        self.compile_count.fetch_add(1, Ordering::Relaxed);
        cache.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Warm the cache at startup so no first-message latency is taken.
    pub fn precompile(&self, source: &str) -> Result<(), ExprError> {
        self.get_or_compile(source).map(|_| ())
    }

    /// Evaluate a source string against an envelope and tag map.
    pub fn evaluate(
        &self,
        source: &str,
        envelope: &FixEnvelope,
        tags: &HashMap<u32, String>,
    ) -> Result<Value, ExprError> {
        let compiled = self.get_or_compile(source)?;
        let ctx = envelope_context(envelope, tags);
        compiled.eval(&ctx)
    }

    /// Partition wrapper: a `null` result means "no key" and is logged
    /// rather than treated as a failure.
    pub fn evaluate_partition_expression(
        &self,
        source: &str,
        envelope: &FixEnvelope,
        tags: &HashMap<u32, String>,
    ) -> Result<Option<Value>, ExprError> {
        match self.evaluate(source, envelope, tags)? {
            Value::Null => {
                info!(expression = source, "partition expression returned null, falling back to broker default");
                Ok(None)
            }
            value => Ok(Some(value)),
        }
    }

    /// Number of distinct expressions compiled so far.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total compile invocations, for asserting the compile-once contract.
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::Relaxed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    #[test]
    fn compiles_at_most_once_per_source() {
        let cache = ExprCache::new();
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        for _ in 0..10 {
            cache.evaluate("Symbol", &env, &HashMap::new()).unwrap();
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn compile_once_across_threads() {
        let cache = Arc::new(ExprCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.get_or_compile("'EQUITY_' + Symbol").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn precompile_then_evaluate() {
        let cache = ExprCache::new();
        cache.precompile("Symbol").unwrap();
        assert_eq!(cache.compile_count(), 1);

        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let value = cache.evaluate("Symbol", &env, &HashMap::new()).unwrap();
        assert_eq!(value, Value::Str("AAPL".into()));
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn partition_key_from_symbol_tag() {
        let cache = ExprCache::new();
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let key = cache
            .evaluate_partition_expression("Symbol", &env, &HashMap::new())
            .unwrap();
        assert_eq!(key, Some(Value::Str("AAPL".into())));
    }

    #[test]
    fn integer_partition_from_if_else() {
        let cache = ExprCache::new();
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let value = cache
            .evaluate(
                "if (MsgType == 'D') { return 1; } else { return 0; }",
                &env,
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(value.as_partition(), Some(1));
    }

    #[test]
    fn null_result_means_no_key() {
        let cache = ExprCache::new();
        let env = FixEnvelope::from_raw("GTWY", "EXEC", "8=FIX.4.4\u{1}35=0\u{1}");
        // Tag 55 is absent, so the `symbol` field binds to null.
        let key = cache
            .evaluate_partition_expression("symbol", &env, &HashMap::new())
            .unwrap();
        assert_eq!(key, None);
    }

    #[test]
    fn compile_error_is_not_cached() {
        let cache = ExprCache::new();
        assert!(cache.precompile("1 +").is_err());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.compile_count(), 0);
    }

    #[test]
    fn eval_error_surfaces() {
        let cache = ExprCache::new();
        let env = FixEnvelope::default();
        let err = cache
            .evaluate("UnboundName + 1", &env, &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }
}
