//! Filtered token enumeration across a loaded module set

use miette::Diagnostic;
use thiserror::Error;

use crate::core::module::Module;
use crate::core::pkcs11::{Rv, SlotId, TokenInfo};
use crate::core::uri::TokenFilter;

/// What the iterator descends into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterBehavior {
    pub with_tokens: bool,
    pub without_objects: bool,
}

impl IterBehavior {
    /// Stop at tokens, do not look at token objects
    pub const TOKENS_ONLY: IterBehavior = IterBehavior {
        with_tokens: true,
        without_objects: true,
    };
}

/// Errors from constructing or advancing a [`TokenIter`]
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum IterError {
    #[error("iterator behavior {0:?} is not supported; only token enumeration is")]
    #[diagnostic(code(p11kit::iter::unsupported))]
    Unsupported(IterBehavior),

    #[error("module '{module}' failed during enumeration: {rv}")]
    #[diagnostic(code(p11kit::iter::module))]
    Module { module: String, rv: Rv },
}

/// A token the iterator is positioned on
#[derive(Debug)]
pub struct TokenMatch<'a, M> {
    pub module: &'a M,
    pub slot: SlotId,
    pub info: TokenInfo,
}

/// Walks modules in order, then each module's slots in order, yielding the
/// tokens accepted by the filter
///
/// Exhaustion ends the sequence with `None`. A module error is yielded once
/// as `Some(Err(_))` and the iterator is finished afterwards.
pub struct TokenIter<'a, M: Module> {
    filter: &'a TokenFilter,
    modules: std::slice::Iter<'a, M>,
    current: Option<(&'a M, std::vec::IntoIter<SlotId>)>,
    finished: bool,
}

impl<'a, M: Module> TokenIter<'a, M> {
    pub fn new(
        filter: &'a TokenFilter,
        behavior: IterBehavior,
        modules: &'a [M],
    ) -> Result<Self, IterError> {
        if behavior != IterBehavior::TOKENS_ONLY {
            return Err(IterError::Unsupported(behavior));
        }

        Ok(Self {
            filter,
            modules: modules.iter(),
            current: None,
            // Nothing can match, so don't touch the modules at all
            finished: filter.has_unrecognized(),
        })
    }

    fn fail(&mut self, module: &M, rv: Rv) -> Option<Result<TokenMatch<'a, M>, IterError>> {
        self.finished = true;
        Some(Err(IterError::Module {
            module: module.name().to_string(),
            rv,
        }))
    }
}

impl<'a, M: Module> Iterator for TokenIter<'a, M> {
    type Item = Result<TokenMatch<'a, M>, IterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if let Some((module, slots)) = &mut self.current {
                let module: &'a M = *module;
                if let Some(slot) = slots.next() {
                    match module.token_info(slot) {
                        Ok(info) if self.filter.matches(&info) => {
                            return Some(Ok(TokenMatch { module, slot, info }));
                        }
                        Ok(_) => continue,
                        // Removed between listing and query
                        Err(Rv::TOKEN_NOT_PRESENT) => continue,
                        Err(rv) => return self.fail(module, rv),
                    }
                }
                self.current = None;
            }

            let Some(module) = self.modules.next() else {
                self.finished = true;
                return None;
            };

            match module.slots() {
                Ok(slots) => {
                    tracing::trace!(module = module.name(), slots = slots.len(), "entering module");
                    self.current = Some((module, slots.into_iter()));
                }
                Err(rv) => return self.fail(module, rv),
            }
        }
    }
}
