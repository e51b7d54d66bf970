// (C) 2025 - Enzo Lombardi

//! The Kernel Session (§4.4): Jupyter messaging envelopes, per-request
//! callback bundles, synchronous-testable message routing, the
//! transport seam, and the reactor-thread session that ties them
//! together.

pub mod callbacks;
pub mod message;
pub mod router;
pub mod session;
pub mod transport;

pub use callbacks::{CallbackBundle, ExecutionState};
pub use message::{KernelMessage, MsgHeader};
pub use router::{CommEvent, InputRequest, Router};
pub use session::{Completion, HistoryEntry, KernelSession, KernelState};
pub use transport::{ChannelTransport, KernelLauncher, KernelTransport, LaunchError};
