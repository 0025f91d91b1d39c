//! Terminal screens for the receiver: picking the port a badge's adapter is
//! on, and watching its records come in.

mod device_selector;
mod error;
mod live_view;

pub use device_selector::device_selector;
pub use error::GuiError;
pub use live_view::{live_view, RecordSource};
