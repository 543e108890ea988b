#[macro_use] extern crate derive_setters;

#[cfg(feature = "log")]
pub extern crate log;

mod clocks;
mod ids;
mod id_generators;
mod metadata;
mod model;
mod stats;
mod events;
mod config;
mod export;
mod record_error;
mod collector;
mod sampling;
mod flamegraph;

pub use clocks::*;
pub use ids::*;
pub use id_generators::*;
pub use metadata::*;
pub use model::*;
pub use stats::*;
pub use events::*;
pub use config::*;
pub use export::*;
pub use record_error::*;
pub use collector::*;
pub use sampling::*;
pub use flamegraph::*;
