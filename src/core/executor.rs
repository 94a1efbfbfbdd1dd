//! Processor abstraction invoked by agents for each dispatched job.

use std::future::Future;

use async_trait::async_trait;

use crate::core::message::{DispatchMessage, ResultMessage};
use crate::core::model::clip_text;

/// What a processor reports back for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The automation ran to completion.
    Succeed {
        /// Return value.
        result: String,
    },
    /// The automation failed.
    Failed {
        /// Partial return value, if any.
        result: String,
        /// Failure detail.
        traceback: String,
    },
}

impl ProcessOutcome {
    /// Wrap the outcome into the wire result for `message`, clipping text
    /// fields to the wire limit.
    pub fn into_result(self, message: &DispatchMessage) -> ResultMessage {
        let track_id = message.track_id.clone();
        match self {
            Self::Succeed { result } => ResultMessage::succeed(track_id, clip_text(&result)),
            Self::Failed { result, traceback } => {
                ResultMessage::failed(track_id, clip_text(&result), clip_text(&traceback))
            }
        }
    }
}

/// Category-specific automation logic.
///
/// The engine never calls a processor itself; agents do, selecting behavior by
/// [`DispatchMessage::category_processor`].
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use taskfleet::core::{DispatchMessage, ProcessOutcome, Processor};
///
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl Processor for Echo {
///     async fn process(&self, message: DispatchMessage) -> ProcessOutcome {
///         ProcessOutcome::Succeed { result: message.configure }
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + Clone + 'static {
    /// Run the job described by `message`.
    async fn process(&self, message: DispatchMessage) -> ProcessOutcome;
}

/// Abstraction for spawning background loops on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
