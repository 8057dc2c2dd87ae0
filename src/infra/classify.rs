//! Maps driver failures onto the benchmark's error taxonomy.

use std::error::Error as _;

use tokio_postgres::error::SqlState;

use crate::domain::{ErrorKind, StrategyError};

/// Classifies an error from either PostgreSQL driver (`postgres` re-exports
/// the `tokio_postgres` error type).
pub fn classify_pg(error: &tokio_postgres::Error) -> StrategyError {
    if let Some(db) = error.as_db_error() {
        return StrategyError::new(classify_sqlstate(db.code()), db.message().to_string());
    }

    let message = error.to_string();
    if error.is_closed() || has_io_source(error) {
        return StrategyError::connectivity(message);
    }
    StrategyError::new(classify_message(&message), message)
}

pub fn classify_sqlstate(code: &SqlState) -> ErrorKind {
    if *code == SqlState::QUERY_CANCELED {
        return ErrorKind::TimeoutFailure;
    }
    match &code.code()[..2] {
        "08" => ErrorKind::ConnectivityFailure,
        "53" => ErrorKind::ResourceExhaustion,
        // operator intervention: admin/crash shutdown, cannot connect now
        "57" => ErrorKind::ConnectivityFailure,
        _ => ErrorKind::QueryFailure,
    }
}

pub fn classify_pool(error: &deadpool_postgres::PoolError) -> StrategyError {
    use deadpool_postgres::PoolError;

    match error {
        PoolError::Backend(e) => classify_pg(e),
        PoolError::Timeout(_) => {
            StrategyError::resource_exhaustion(format!("pool checkout timed out: {}", error))
        }
        _ => StrategyError::connectivity(error.to_string()),
    }
}

/// Best-effort classification of free text, used where only a message
/// survives (worker stderr, non-database driver errors).
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if any(&["statement timeout", "canceling statement", "timed out"]) {
        ErrorKind::TimeoutFailure
    } else if any(&["out of memory", "too many connections", "no space left", "cannot allocate"]) {
        ErrorKind::ResourceExhaustion
    } else if any(&[
        "connection refused",
        "could not connect",
        "server closed",
        "connection reset",
        "broken pipe",
        "connection closed",
    ]) {
        ErrorKind::ConnectivityFailure
    } else {
        ErrorKind::ProtocolFailure
    }
}

fn has_io_source(error: &tokio_postgres::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}
