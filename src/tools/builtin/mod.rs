//! Built-in tools.

pub mod notify;
pub mod progress;
pub mod time;

pub use notify::{HumanNotification, NotifyHumanTool};
pub use progress::UserProgressTool;
pub use time::CurrentTimeTool;
