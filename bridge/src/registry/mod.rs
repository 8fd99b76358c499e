//! Service Registry
//!
//! Named object directory shared by all modules. Lookups are either
//! synchronous (`try_use`) or async with a deadline (`use_service`), so a
//! module never has to assume the provider was loaded first.

mod directory;
mod waiter;

pub use directory::{RegistryMetrics, ServiceHandle, ServiceRegistry};
