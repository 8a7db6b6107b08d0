pub mod config;
pub mod record;
pub mod term;

pub use config::*;
pub use record::*;
pub use term::*;
