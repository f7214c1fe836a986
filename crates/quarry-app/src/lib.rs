//! Frame scheduler for the Quarry client.
//!
//! Once per rendered frame the scheduler drains network packets, build
//! completions, and deferred callbacks without blocking, steps the
//! fixed-rate simulation, submits the frame, and hands dirty sections to the
//! build pool as worker slots free up.

pub mod clock;
pub mod collab;
pub mod events;
pub mod headless;
pub mod scheduler;

pub use clock::{FixedTicker, FrameClock};
pub use collab::{
    HandlerContext, LoadGate, LoadSignal, PacketHandler, Renderer, Simulation, load_gate,
};
pub use events::{DeferredCallback, DeferredSender, EventChannels, EventSource, FrameEvent, Polled};
pub use scheduler::{FramePhase, FrameReport, FrameScheduler, FrameStats, SchedulerError};
