pub mod record;
pub mod task_registry;

pub use record::*;
pub use task_registry::*;
