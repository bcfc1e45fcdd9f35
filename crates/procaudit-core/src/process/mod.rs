//! Process ancestry reasoning and subscription matching.

mod cache;
mod filter;
mod inspector;
mod tree;

pub use cache::{CorrelationCache, DEFAULT_CAPACITY as DEFAULT_CACHE_CAPACITY, DEFAULT_TTL as DEFAULT_CACHE_TTL};
pub use filter::{FilterError, ProcessFilter, ProcessRef};
pub use inspector::{InspectorError, ProcessInspector, ProcessRecord};
#[cfg(target_os = "linux")]
pub use inspector::ProcfsInspector;
pub use tree::ProcessTree;
