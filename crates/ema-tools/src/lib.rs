//! Concrete `Tool` implementations: the distinguished reply tool plus a
//! small illustrative set (`done`, `shell`) exercising the contract.

pub mod done;
pub mod reply;
pub mod shell;

pub use done::DoneTool;
pub use reply::{EmaReplyTool, REPLY_TOOL_NAME};
pub use shell::ShellTool;
