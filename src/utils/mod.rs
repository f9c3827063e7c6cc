pub mod logging;
pub mod retry;

pub use logging::*;
pub use retry::*;
