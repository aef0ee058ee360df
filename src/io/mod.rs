//! I/O layer - process management and transport
//!
//! - **Transport**: raw bidirectional text exchange with a child process
//! - **Process**: child process lifecycle with stdio wiring
//!
//! Neither layer knows about the CMake server framing built on top of them.

pub mod process;
pub mod transport;

pub use process::{ChildProcessManager, ProcessError, ProcessState, StderrMonitor, StopMode};
pub use transport::{MockTransport, StdioTransport, Transport};
