//! p11-kit: command line client for configured PKCS#11 modules
//!
//! Lists modules and the tokens they present, selects tokens by PKCS#11 URI,
//! and hands any other command to a `p11-kit-<name>` helper executable.

pub mod cli;
pub mod core;
