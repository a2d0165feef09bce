//! Asynchronous BBCode post-processing.
//!
//! A pass over a record mirrors every image its raw text references and, if
//! anything new was cached, refreshes the rendered text. Passes are scheduled
//! through [`Dispatch`] and run in the background by [`PostprocessQueue`].

mod locks;
mod orchestrator;
mod queue;
#[cfg(test)]
pub(crate) mod testing;

pub use locks::{RecordGuard, RecordLocks};
pub use orchestrator::{PostprocessError, PostprocessReport, Postprocessor};
pub use queue::{Dispatch, PostprocessEvent, PostprocessQueue};
