use std::io;
use std::result;

use thiserror::Error;

/// A specialized result type for runtime operations.
pub type Result<T> = result::Result<T, Error>;

/// Errors returned by the runtime.
///
/// Synchronous failures never leave side effects behind: a call that
/// returns an error has not allocated, bound, or enqueued anything.
/// Delivery failures are never reported here; they surface through the
/// event queue or counting event configured on the initiating memory
/// descriptor.
#[derive(Debug, Error)]
pub enum Error {
    /// A handle, index, length, or option set failed validation.
    #[error("invalid argument")]
    ArgInvalid,
    /// An object pool or table is at its configured limit.
    #[error("out of space")]
    NoSpace,
    /// The runtime has not been initialised, or has been torn down.
    #[error("runtime not initialised")]
    NoInit,
    /// The object still has outstanding references and cannot be freed.
    #[error("object in use")]
    InUse,
    /// A blocking wait was interrupted by interface teardown.
    #[error("wait interrupted")]
    Interrupted,
    /// No counting event reached its threshold before the timeout.
    #[error("no counting event reached its threshold")]
    CtNoneReached,
    /// The event queue holds no events.
    #[error("event queue empty")]
    EqEmpty,
    /// Events were overwritten since the queue was last drained.
    #[error("event queue dropped events")]
    EqDropped,
    /// The operation is not supported in the current design.
    #[error("operation failed")]
    Fail,
    /// A transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Stable numeric code, used on the process-engine command queue.
    pub(crate) fn code(&self) -> i32 {
        match self {
            Error::ArgInvalid => 1,
            Error::NoSpace => 2,
            Error::NoInit => 3,
            Error::InUse => 4,
            Error::Interrupted => 5,
            Error::CtNoneReached => 6,
            Error::EqEmpty => 7,
            Error::EqDropped => 8,
            Error::Fail => 9,
            Error::Io(_) => 10,
        }
    }

    pub(crate) fn from_code(code: i32) -> Option<Error> {
        Some(match code {
            1 => Error::ArgInvalid,
            2 => Error::NoSpace,
            3 => Error::NoInit,
            4 => Error::InUse,
            5 => Error::Interrupted,
            6 => Error::CtNoneReached,
            7 => Error::EqEmpty,
            8 => Error::EqDropped,
            9 => Error::Fail,
            10 => Error::Io(io::Error::new(io::ErrorKind::Other, "remote i/o failure")),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 1..=9 {
            let err = Error::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert!(Error::from_code(0).is_none());
        assert!(Error::from_code(99).is_none());
    }
}
