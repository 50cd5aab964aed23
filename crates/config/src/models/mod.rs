pub mod app_config;
pub mod logging;
pub mod runner_dispatcher;
pub mod storage;

pub use app_config::*;
pub use logging::*;
pub use runner_dispatcher::*;
pub use storage::*;
