//! Session orchestration and viewport policy.

pub mod session;
pub mod viewport;

pub use session::{ConnectionSignal, Session, SessionUpdate, SessionView};
pub use viewport::{ScrollAttribution, ScrollRequest, ViewportPolicy};
