use crate::scheduler::CallError;
use std::convert::Infallible;

/// Why a future could not hand its value out.
#[derive(thiserror::Error, Debug)]
pub enum FutureError<E = Infallible> {
    /// `get_value` was called before the computation completed, or the
    /// value was already moved out.
    #[error("the future's value is not ready")]
    ValuePending,

    #[error(transparent)]
    Call(#[from] CallError<E>),
}
