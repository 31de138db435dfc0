//! # stepwise-core - Core Domain Types
//!
//! Foundation crate for stepwise. Provides the trace result model, session
//! state, output stream events, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, serde_json, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Results (`result`)
//! - [`TraceResult`] - One event emitted by a tracer (step, print, exception, completed)
//! - [`ResultKind`] - Result discriminator, open to tracer-specific kinds
//! - [`ResultBatch`] - Non-empty ordered results answering one command
//! - [`Sentinel`] - Classification of a batch's last result
//!
//! ### Sessions and Streams (`session`, `events`)
//! - [`SessionState`] - Created / Started / Stopped
//! - [`Line`], [`StreamOrigin`] - A complete output line tagged by stream
//! - [`TracerEvent`] - Line or process exit, as delivered by a transport
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with protocol/process fault classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use stepwise_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod result;
pub mod session;

/// Prelude for common imports used throughout all stepwise crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, trace, warn};
}

pub use error::{Error, FaultKind, Result, ResultExt};
pub use events::{Line, StreamOrigin, TracerEvent};
pub use result::{ResultBatch, ResultKind, Sentinel, TraceResult};
pub use session::SessionState;
