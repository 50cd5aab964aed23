//! # Shipqueue Testing Utils
//!
//! Shared test doubles for the workspace: queue item builders, sample tasks,
//! recording event handlers and storage wrappers that simulate outages.
//!
//! ```toml
//! [dev-dependencies]
//! shipqueue-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod handlers;
pub mod helpers;
pub mod mocks;
pub mod tasks;

pub use builders::*;
pub use handlers::*;
pub use helpers::*;
pub use mocks::*;
pub use tasks::*;
