//! # GCodeService Core
//!
//! Core types shared by every GCodeService crate: the error taxonomy,
//! the events published to subscribers, and the asynchronous callback
//! dispatcher that delivers them.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;

pub use dispatcher::{CallbackDispatcher, EventPublisher};
pub use error::{EngineError, Error, JobFileError, Result, TransportError};
pub use event::{
    ActionKind, CommentInfo, FirmwareErrorKind, GcodeAction, ServiceEvent, StateChange,
    TempChannel, TemperatureReading,
};
pub use listener::{EventSubscriber, FnSubscriber};
