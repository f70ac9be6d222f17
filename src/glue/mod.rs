//! Lifecycle orchestration and the consent state machine.

mod controller;
pub mod ports;
mod state;

pub use controller::ExtensionGlue;
pub use ports::{
    ConsentFormMessage, ConsentStatusReply, PortClient, PortEnvelope, PortHandler, PortName,
    PortRegistry, ReportRegretFormMessage, ReportRegretFormReply,
};
pub use state::GlueState;
