//! The only error this crate ever hands back to application code.

use core::fmt::{self, Debug, Formatter};

/// Marker returned when a transaction cannot proceed and must be retried.
///
/// `Retry` carries no data; the descriptor's buffers have already been reset
/// and its locks released by the time this is returned. Application code
/// threads it through `?` and re-enters [`crate::engine::start`], or lets
/// [`crate::thread_key::ThreadKey::rw`]/`read` do that looping for it.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Retry;

impl Debug for Retry {
    #[cold]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad("Retry")
    }
}

pub type TxResult<T> = Result<T, Retry>;
