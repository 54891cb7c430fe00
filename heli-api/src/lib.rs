pub mod demand;
pub mod log;
pub mod message;
pub mod session;

pub use demand::{Demand, DemandPatch};
pub use message::{Message, ProtocolError};
pub use session::{SessionEvent, SessionState};
