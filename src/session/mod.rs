pub mod conversation;
pub mod drawer;
pub mod panel;
pub mod task;

#[cfg(test)]
pub(crate) mod fake;

pub use conversation::{Conversation, Message, MessageKind, Role};
pub use drawer::{ChatDrawer, DrawerState, VoiceToggle};
pub use panel::{PanelController, PanelState, Tab};
pub use task::{TaskHandle, TaskStatus};
