//! Core module - PKCS#11 types, token selection and module loading

pub mod config;
pub mod iter;
pub mod module;
pub mod pkcs11;
pub mod registry;
pub mod uri;

pub use config::Config;
pub use iter::{IterBehavior, IterError, TokenIter, TokenMatch};
pub use module::{LoadError, Module, ModuleBackend, ModuleSet};
pub use pkcs11::{Rv, SlotId, TokenFlags, TokenInfo, Version};
pub use registry::{Registry, RegistryError};
pub use uri::{format_token_uri, TokenFilter, UriError};
