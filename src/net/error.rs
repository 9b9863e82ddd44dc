use std::{io, net::SocketAddr, time::Duration};

use super::{link::LinkState, wire::RecordKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // request validation
    #[error("function id {0} is not supported")]
    UnsupportedFunction(i32),
    #[error("unknown function name {0:?}")]
    UnknownFunctionName(String),
    #[error("[{left}, {right}] is not a valid integration interval")]
    InvalidInterval { left: f64, right: f64 },
    #[error("tolerance {0} cannot be met with a finite number of steps")]
    InvalidTolerance(f64),

    // transport
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("could not resolve {0}")]
    Unresolvable(String),
    #[error("gave up connecting to {addr} after {attempts} attempts")]
    ConnectAttemptsExhausted { addr: SocketAddr, attempts: u32 },

    // protocol
    #[error("peer hung up before sending its {0} record")]
    Disconnected(RecordKind),
    #[error("short {kind} record: expected {expected} bytes, got {received}")]
    ShortRecord {
        kind: RecordKind,
        expected: usize,
        received: usize,
    },
    #[error("could not write the whole {0} record")]
    ShortWrite(RecordKind),
    #[error("expected a {expected} record, got prefix {prefix:#04x}")]
    BadPrefix { expected: RecordKind, prefix: u8 },
    #[error("link {link} saw traffic while {state:?}")]
    UnexpectedState { link: usize, state: LinkState },

    // run
    #[error("no worker advertised usable capacity")]
    NoCapacity,
    #[error("workers did not register within {0:?}")]
    RegistrationTimedOut(Duration),
    #[error("results did not arrive within {0:?}")]
    TimedOut(Duration),
    #[error("could not start the compute pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Validation errors reject a request without poisoning the run. Every
    /// other error means the computation cannot complete.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnsupportedFunction(_)
                | Error::UnknownFunctionName(_)
                | Error::InvalidInterval { .. }
                | Error::InvalidTolerance(_)
        )
    }
}
