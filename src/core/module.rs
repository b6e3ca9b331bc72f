//! Loaded module sets and the backend seam that produces them
//!
//! A [`ModuleBackend`] knows how to load, initialize and finalize the
//! configured modules. [`ModuleSet`] owns one loaded set and hands it back to
//! its backend for finalization exactly once, when the set is dropped.

use miette::Diagnostic;
use thiserror::Error;

use crate::core::pkcs11::{Rv, SlotId, TokenInfo};

/// Errors from loading and initializing the module set
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum LoadError {
    #[error("no modules are configured")]
    #[diagnostic(
        code(p11kit::modules::none),
        help("add a module config file to one of the directories shown by 'p11-kit print-config'")
    )]
    NoModules,

    #[error("none of the {attempted} configured modules could be initialized")]
    #[diagnostic(code(p11kit::modules::all_failed))]
    AllFailed { attempted: usize },
}

/// One initialized module
pub trait Module {
    /// Registered module name
    fn name(&self) -> &str;

    /// Path of the library backing the module, if known
    fn library_path(&self) -> Option<&str>;

    /// Slots that currently hold a token, in slot order
    fn slots(&self) -> Result<Vec<SlotId>, Rv>;

    /// Token descriptor for a slot
    fn token_info(&self, slot: SlotId) -> Result<TokenInfo, Rv>;
}

/// Loads and finalizes the configured module set
pub trait ModuleBackend {
    type Module: Module;

    /// Load and initialize every configured module, in registration order
    ///
    /// Modules that fail to initialize are left out. Returns an error when
    /// modules were configured but none could be initialized.
    fn load_and_initialize(&self) -> Result<Vec<Self::Module>, LoadError>;

    /// Finalize and release a set previously returned by
    /// [`load_and_initialize`](Self::load_and_initialize)
    fn finalize_and_release(&self, modules: Vec<Self::Module>);
}

/// A loaded module set, finalized on drop
pub struct ModuleSet<'b, B: ModuleBackend> {
    backend: &'b B,
    modules: Option<Vec<B::Module>>,
}

impl<'b, B: ModuleBackend> ModuleSet<'b, B> {
    /// Load the backend's modules
    ///
    /// An empty set is reported as [`LoadError::NoModules`]; the backend
    /// still gets to finalize whatever it returned.
    pub fn load(backend: &'b B) -> Result<Self, LoadError> {
        let modules = backend.load_and_initialize()?;
        let set = Self {
            backend,
            modules: Some(modules),
        };
        if set.modules().is_empty() {
            return Err(LoadError::NoModules);
        }
        tracing::debug!(count = set.modules().len(), "loaded modules");
        Ok(set)
    }

    pub fn modules(&self) -> &[B::Module] {
        self.modules.as_deref().unwrap_or(&[])
    }
}

impl<B: ModuleBackend> Drop for ModuleSet<'_, B> {
    fn drop(&mut self) {
        if let Some(modules) = self.modules.take() {
            tracing::debug!(count = modules.len(), "finalizing modules");
            self.backend.finalize_and_release(modules);
        }
    }
}

/// In-memory backend with call counters, for exercising release paths
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct MockModule {
        name: String,
        slots: Vec<Result<TokenInfo, Rv>>,
        slots_error: Option<Rv>,
        slot_queries: Rc<Cell<usize>>,
    }

    impl MockModule {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                slots: Vec::new(),
                slots_error: None,
                slot_queries: Rc::new(Cell::new(0)),
            }
        }

        pub fn token(mut self, info: TokenInfo) -> Self {
            self.slots.push(Ok(info));
            self
        }

        /// A slot whose token query fails with `rv`
        pub fn broken_slot(mut self, rv: Rv) -> Self {
            self.slots.push(Err(rv));
            self
        }

        /// Make the slot listing itself fail
        pub fn slots_fail(mut self, rv: Rv) -> Self {
            self.slots_error = Some(rv);
            self
        }
    }

    impl Module for MockModule {
        fn name(&self) -> &str {
            &self.name
        }

        fn library_path(&self) -> Option<&str> {
            None
        }

        fn slots(&self) -> Result<Vec<SlotId>, Rv> {
            self.slot_queries.set(self.slot_queries.get() + 1);
            match self.slots_error {
                Some(rv) => Err(rv),
                None => Ok((0..self.slots.len() as SlotId).collect()),
            }
        }

        fn token_info(&self, slot: SlotId) -> Result<TokenInfo, Rv> {
            self.slots
                .get(slot as usize)
                .cloned()
                .unwrap_or(Err(Rv::SLOT_ID_INVALID))
        }
    }

    pub struct MockBackend {
        modules: Vec<MockModule>,
        load_error: Option<LoadError>,
        pub slot_queries: Rc<Cell<usize>>,
        pub loads: Cell<usize>,
        pub finalizes: Cell<usize>,
    }

    impl MockBackend {
        pub fn new(modules: Vec<MockModule>) -> Self {
            let slot_queries = Rc::new(Cell::new(0));
            let modules = modules
                .into_iter()
                .map(|mut m| {
                    m.slot_queries = Rc::clone(&slot_queries);
                    m
                })
                .collect();
            Self {
                modules,
                load_error: None,
                slot_queries,
                loads: Cell::new(0),
                finalizes: Cell::new(0),
            }
        }

        pub fn failing(error: LoadError) -> Self {
            let mut backend = Self::new(Vec::new());
            backend.load_error = Some(error);
            backend
        }

        /// Every successful load was matched by one finalize
        pub fn balanced(&self) -> bool {
            self.loads.get() == self.finalizes.get()
        }
    }

    impl ModuleBackend for MockBackend {
        type Module = MockModule;

        fn load_and_initialize(&self) -> Result<Vec<MockModule>, LoadError> {
            if let Some(err) = &self.load_error {
                return Err(err.clone());
            }
            self.loads.set(self.loads.get() + 1);
            Ok(self.modules.clone())
        }

        fn finalize_and_release(&self, _modules: Vec<MockModule>) {
            self.finalizes.set(self.finalizes.get() + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MockBackend, MockModule};
    use super::*;

    #[test]
    fn test_set_is_finalized_once_on_drop() {
        let backend = MockBackend::new(vec![MockModule::new("one"), MockModule::new("two")]);
        {
            let set = ModuleSet::load(&backend).unwrap();
            assert_eq!(set.modules().len(), 2);
            assert_eq!(set.modules()[0].name(), "one");
            assert_eq!(backend.finalizes.get(), 0);
        }
        assert_eq!(backend.loads.get(), 1);
        assert_eq!(backend.finalizes.get(), 1);
    }

    #[test]
    fn test_empty_set_is_an_error_and_still_released() {
        let backend = MockBackend::new(Vec::new());
        let err = ModuleSet::load(&backend).err().unwrap();
        assert_eq!(err, LoadError::NoModules);
        assert!(backend.balanced());
        assert_eq!(backend.loads.get(), 1);
    }

    #[test]
    fn test_backend_failure_acquires_nothing() {
        let backend = MockBackend::failing(LoadError::AllFailed { attempted: 2 });
        let err = ModuleSet::load(&backend).err().unwrap();
        assert_eq!(err, LoadError::AllFailed { attempted: 2 });
        assert_eq!(backend.loads.get(), 0);
        assert_eq!(backend.finalizes.get(), 0);
    }
}
