//! Study session timer
//!
//! The clock source, the engine, observer attachments, and the dispatcher
//! that maps external signals onto the engine.

pub mod attachment;
pub mod clock;
pub mod dispatcher;
pub mod engine;

pub use attachment::{Attachment, AttachmentHandle};
pub use clock::{Clock, TokioClock};
pub use dispatcher::{
    cancel_enabled, finish_enabled, resolve, toggle_label, CommandDispatcher, Operation, Signal,
    UnknownSignal,
};
pub use engine::{SessionTimer, TICK_INTERVAL};
