use crate::handle::Caught;
use crate::transport::PickupError;
use std::convert::Infallible;

/// Why a cross-thread call did not come back with a value.
///
/// `E` is the expected-failure type of the call; the default `Infallible`
/// makes the [`Failed`] arm unconstructible for calls that declare no
/// expected failures.
///
/// [`Failed`]: CallError::Failed
#[derive(thiserror::Error, Debug)]
pub enum CallError<E = Infallible> {
    /// The transport refused to arm a pickup. Nothing remains enqueued.
    #[error("call scheduling failed: the transport refused to arm a pickup")]
    SchedulingFailed(#[source] PickupError),

    /// The deadline elapsed before the target thread picked the call up.
    /// The call was removed from its queue and will never run.
    #[error("the call timed out before the target thread reached a pickup point")]
    Timeout,

    /// The call ran and failed with an expected failure; the payload is
    /// intact.
    #[error("the call failed on the target thread")]
    Failed(Caught<E>),

    /// The call ran and failed outside its expected-failure set. The
    /// payload is not transported.
    #[error("the call raised an unexpected failure on the target thread")]
    Unexpected,
}

impl<E> CallError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout)
    }

    /// The captured expected failure, if that is what this error is.
    pub fn into_failure(self) -> Option<Caught<E>> {
        match self {
            CallError::Failed(caught) => Some(caught),
            _ => None,
        }
    }
}
