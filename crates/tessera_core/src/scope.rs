//! Scoped allocation around engine calls.
//!
//! Values marshaled for the engine live in one of two scopes:
//!
//! - [`GetterScope`]: the engine owns what it returns, nothing is staged
//!   and nothing needs releasing
//! - [`SetterScope`]: the caller stages the values it hands the engine, and
//!   they are released when the scope ends, on success or on an early `?`
//!   return
//!
//! Only `SetterScope` can stage, so a multi-buffer setter call cannot be
//! written against a getter scope.

use crate::error::CoreResult;
use tessera_codec::StorageValue;
use tessera_engine::EngineResult;
use tracing::trace;

/// Scope for engine reads.
#[derive(Debug)]
pub struct GetterScope {
    _private: (),
}

impl GetterScope {
    /// Runs `f` inside a getter scope.
    pub fn run<R>(f: impl FnOnce(&GetterScope) -> CoreResult<R>) -> CoreResult<R> {
        f(&GetterScope { _private: () })
    }

    /// Calls the engine and translates its error.
    pub fn call<T>(&self, f: impl FnOnce() -> EngineResult<T>) -> CoreResult<T> {
        Ok(f()?)
    }
}

/// Scope for engine writes with caller-owned staged values.
pub struct SetterScope {
    staged: Vec<StorageValue>,
}

impl SetterScope {
    /// Runs `f` inside a setter scope and releases everything staged in it.
    pub fn run<R>(f: impl FnOnce(&mut SetterScope) -> CoreResult<R>) -> CoreResult<R> {
        let mut scope = Self { staged: Vec::new() };
        f(&mut scope)
    }

    /// Stages `value` and passes it to an engine call.
    ///
    /// The value stays staged until the scope ends.
    pub fn with_staged<T>(
        &mut self,
        value: StorageValue,
        f: impl FnOnce(&StorageValue) -> EngineResult<T>,
    ) -> CoreResult<T> {
        self.staged.push(value);
        let staged = &self.staged[self.staged.len() - 1];
        Ok(f(staged)?)
    }
}

impl Drop for SetterScope {
    fn drop(&mut self) {
        trace!(staged = self.staged.len(), "releasing setter scope");
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use tessera_engine::{EngineError, ErrorCode};

    #[test]
    fn staged_value_reaches_the_engine_call() {
        let result = SetterScope::run(|scope| {
            scope.with_staged(StorageValue::Int(1), |v| Ok(v.clone()))
        });
        assert_eq!(result.unwrap(), StorageValue::Int(1));
    }

    #[test]
    fn setter_scope_translates_errors() {
        let result: CoreResult<()> = SetterScope::run(|scope| {
            scope.with_staged(StorageValue::from("x"), |_| {
                Err(EngineError::new(ErrorCode::PropertyNotNullable, "null"))
            })?;
            unreachable!("the staged call failed")
        });
        assert!(matches!(result, Err(CoreError::ConstraintViolation { .. })));
    }

    #[test]
    fn earlier_staged_values_outlive_later_calls() {
        SetterScope::run(|scope| {
            scope.with_staged(StorageValue::Int(1), |_| Ok(()))?;
            scope.with_staged(StorageValue::Int(2), |_| Ok(()))?;
            assert_eq!(scope.staged, vec![StorageValue::Int(1), StorageValue::Int(2)]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn getter_scope_translates_errors() {
        let err = GetterScope::run(|scope| {
            scope.call(|| -> EngineResult<()> { Err(EngineError::not_in_write()) })
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::TransactionState { .. }));
    }
}
