//! Statements issued against `public.records` and the helpers that bind them.

use tokio_postgres::types::ToSql;

use crate::app::ports::RecordQuery;
use crate::domain::{IdRange, StatementTimeout};

pub const SELECT_PREFIX: &str = "SELECT * FROM public.records ORDER BY id LIMIT $1";
pub const SELECT_KEYS: &str = "SELECT * FROM public.records WHERE id = ANY($1) ORDER BY id";
pub const SELECT_IDS: &str = "SELECT id FROM public.records ORDER BY id LIMIT $1";
pub const SELECT_IDS_AFTER: &str =
    "SELECT id FROM public.records WHERE id > $1 ORDER BY id LIMIT $2";

/// `SET LOCAL` so the timeout dies with the transaction; `None` when disabled.
pub fn set_local_timeout(timeout: StatementTimeout) -> Option<String> {
    timeout
        .is_enabled()
        .then(|| format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
}

pub fn limit_param(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub fn portal_rows(max_rows: u32) -> i32 {
    i32::try_from(max_rows.max(1)).unwrap_or(i32::MAX)
}

/// Owned parameters for a [`RecordQuery`], kept alive across the bind.
pub enum RecordParams<'a> {
    Prefix(i64),
    Keys(&'a [i64]),
}

impl<'a> RecordParams<'a> {
    pub fn new(query: RecordQuery<'a>) -> Self {
        match query {
            RecordQuery::Prefix { limit } => Self::Prefix(limit_param(limit)),
            RecordQuery::Keys(ids) => Self::Keys(ids),
        }
    }

    pub fn statement(&self) -> &'static str {
        match self {
            Self::Prefix(_) => SELECT_PREFIX,
            Self::Keys(_) => SELECT_KEYS,
        }
    }

    pub fn params(&self) -> [&(dyn ToSql + Sync); 1] {
        match self {
            Self::Prefix(limit) => [limit],
            Self::Keys(ids) => [ids],
        }
    }
}

/// Phase-1 key statement and its parameters for one range.
pub struct IdParams {
    after: Option<i64>,
    limit: i64,
}

impl IdParams {
    pub fn new(range: IdRange) -> Self {
        Self {
            after: range.after,
            limit: limit_param(range.limit),
        }
    }

    pub fn statement(&self) -> &'static str {
        match self.after {
            Some(_) => SELECT_IDS_AFTER,
            None => SELECT_IDS,
        }
    }

    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        match &self.after {
            Some(after) => vec![after, &self.limit],
            None => vec![&self.limit],
        }
    }
}
