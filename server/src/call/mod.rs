pub mod signaling;
pub mod state;

pub use signaling::CallSignalingRelay;
pub use state::{CallSession, CallState};
