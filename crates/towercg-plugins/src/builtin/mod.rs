//! Built-in plugins

mod counter;

pub use counter::CounterPlugin;
