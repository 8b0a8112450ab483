//! Runtime options shared by every decision cycle

mod registry;

pub use registry::OptionsRegistry;
