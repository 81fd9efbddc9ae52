use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::definition::PartValue;
use crate::error::CompositionError;
use crate::metadata::Metadata;

type LazyFactory = Box<dyn Fn() -> Result<PartValue, CompositionError> + Send + Sync>;

/// A one-shot memoized thunk producing a part value.
///
/// The first successful evaluation wins and is observed by every caller;
/// concurrent evaluations collapse to one construction. A failed evaluation
/// is not memoized, so the thunk may be retried. Same-thread reentrant
/// evaluation (a constructor import cycling back into the value being
/// built) is reported as an error rather than deadlocking.
#[derive(Clone)]
pub struct LazyExport {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    /// Diagnostic label, usually the part type or contract name.
    label: String,
    cell: OnceCell<PartValue>,
    /// Thread currently running the factory, while the factory lock is held.
    evaluating: Mutex<Option<ThreadId>>,
    factory: Mutex<LazyFactory>,
}

impl LazyExport {
    /// Wrap an already-constructed value.
    pub fn completed(label: impl Into<String>, value: PartValue) -> Self {
        let backup = value.clone();
        Self {
            inner: Arc::new(LazyInner {
                label: label.into(),
                cell: OnceCell::with_value(value),
                evaluating: Mutex::new(None),
                factory: Mutex::new(Box::new(move || Ok(backup.clone()))),
            }),
        }
    }

    /// Defer construction to `factory`, run at most once successfully.
    pub fn from_factory(
        label: impl Into<String>,
        factory: impl Fn() -> Result<PartValue, CompositionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                label: label.into(),
                cell: OnceCell::new(),
                evaluating: Mutex::new(None),
                factory: Mutex::new(Box::new(factory)),
            }),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    /// The memoized value, constructing it on first call.
    pub fn value(&self) -> Result<PartValue, CompositionError> {
        if let Some(value) = self.inner.cell.get() {
            return Ok(value.clone());
        }

        // A reentrant call from the factory itself would block forever on
        // the factory lock below; surface it as an error instead.
        if *self.inner.evaluating.lock() == Some(thread::current().id()) {
            return Err(CompositionError::RecursiveConstruction {
                part: self.inner.label.clone(),
            });
        }

        let factory = self.inner.factory.lock();
        // Another thread may have finished while we waited for the lock.
        if let Some(value) = self.inner.cell.get() {
            return Ok(value.clone());
        }

        *self.inner.evaluating.lock() = Some(thread::current().id());
        let result = (*factory)();
        *self.inner.evaluating.lock() = None;

        let value = result?;
        let _ = self.inner.cell.set(value.clone());
        Ok(value)
    }
}

/// A typed lazy export: the untyped thunk plus the export's metadata, with
/// the downcast deferred to first use.
pub struct Lazy<T: Any + Send + Sync> {
    untyped: LazyExport,
    contract_name: String,
    metadata: Metadata,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Lazy<T> {
    pub(crate) fn new(untyped: LazyExport, contract_name: String, metadata: Metadata) -> Self {
        Self {
            untyped,
            contract_name,
            metadata,
            _marker: PhantomData,
        }
    }

    /// Construct (if needed) and downcast the exported value.
    pub fn value(&self) -> Result<Arc<T>, CompositionError> {
        self.untyped
            .value()?
            .downcast::<T>()
            .map_err(|_| CompositionError::TypeMismatch {
                contract: self.contract_name.clone(),
            })
    }

    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
