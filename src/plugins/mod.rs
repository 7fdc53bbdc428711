//! Switchyard components: routing, reinforcement weights, the write-through
//! memory bus and its governance monitor.

pub mod documents;
pub mod governance;
pub mod index;
pub mod memory_bus;
pub mod registry;
pub mod weights;
