pub mod aggregation;
pub mod error_handling;
pub mod executor;
pub mod runner;
pub mod template;
pub mod types;

pub use aggregation::*;
pub use error_handling::*;
pub use executor::*;
pub use runner::*;
pub use template::*;
pub use types::*;
