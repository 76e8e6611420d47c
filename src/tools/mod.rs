//! Tool abstraction for agent capabilities.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::{CurrentTimeTool, HumanNotification, NotifyHumanTool, UserProgressTool};
pub use registry::ToolRegistry;
pub use tool::*;
