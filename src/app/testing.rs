//! In-memory stand-ins for the database, worker, probe and strategy ports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ChunkFailure, IdRange, StatementTimeout, StrategyError, StrategyKind};
use crate::ports::{
    AllocationTracker, AsyncBatchCursor, AsyncConnection, AsyncConnector, AsyncPool, BatchCursor,
    ChunkTask, Closeable, Execution, PoolSize, RecordQuery, ResourceProbe, ResourceSnapshot,
    Strategy, StrategyFactory, SyncConnection, SyncConnector, SyncPool, WorkerLauncher,
};

#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub connect: Option<StrategyError>,
    pub prefix: Option<StrategyError>,
    /// Fails any key query that includes this id
    pub key: Option<(i64, StrategyError)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub connects: usize,
    pub pools_opened: usize,
    pub pools_closed: usize,
    pub checkouts: usize,
    pub cursors: usize,
    pub id_requests: Vec<IdRange>,
    pub pool_sizes: Vec<usize>,
    /// Pooled connections handed out and not yet dropped
    pub outstanding: usize,
}

/// A sorted `public.records` id column with fault injection and call accounting.
#[derive(Clone)]
pub struct RecordTable {
    ids: Arc<Vec<i64>>,
    faults: Arc<Mutex<Faults>>,
    stats: Arc<Mutex<TableStats>>,
}

impl RecordTable {
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids: Arc::new(ids),
            faults: Arc::default(),
            stats: Arc::default(),
        }
    }

    pub fn contiguous(rows: i64) -> Self {
        Self::from_ids(1..=rows)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn fail_connect(&self, error: StrategyError) -> &Self {
        lock(&self.faults).connect = Some(error);
        self
    }

    pub fn fail_prefix(&self, error: StrategyError) -> &Self {
        lock(&self.faults).prefix = Some(error);
        self
    }

    pub fn fail_keys_containing(&self, id: i64, error: StrategyError) -> &Self {
        lock(&self.faults).key = Some((id, error));
        self
    }

    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }

    pub fn stats(&self) -> TableStats {
        lock(&self.stats).clone()
    }

    fn connect(&self) -> Result<(), StrategyError> {
        if let Some(error) = lock(&self.faults).connect.clone() {
            return Err(error);
        }
        lock(&self.stats).connects += 1;
        Ok(())
    }

    fn rows_for(&self, query: RecordQuery<'_>) -> Result<usize, StrategyError> {
        let faults = lock(&self.faults).clone();
        match query {
            RecordQuery::Prefix { limit } => match faults.prefix {
                Some(error) => Err(error),
                None => Ok(self.ids.len().min(limit as usize)),
            },
            RecordQuery::Keys(keys) => {
                if let Some((id, error)) = faults.key.filter(|(id, _)| keys.contains(id)) {
                    return Err(error);
                }
                Ok(keys
                    .iter()
                    .filter(|key| self.ids.binary_search(key).is_ok())
                    .count())
            }
        }
    }

    fn open(&self, query: RecordQuery<'_>) -> Result<FakeCursor, StrategyError> {
        let remaining = self.rows_for(query)?;
        lock(&self.stats).cursors += 1;
        Ok(FakeCursor { remaining })
    }

    fn ids_in(&self, range: IdRange) -> Vec<i64> {
        lock(&self.stats).id_requests.push(range);
        self.ids
            .iter()
            .copied()
            .filter(|id| range.after.is_none_or(|after| *id > after))
            .take(range.limit as usize)
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct FakeCursor {
    remaining: usize,
}

impl BatchCursor for FakeCursor {
    fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError> {
        let batch = self.remaining.min(max_rows as usize);
        self.remaining -= batch;
        Ok(batch)
    }
}

#[async_trait]
impl AsyncBatchCursor for FakeCursor {
    async fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError> {
        BatchCursor::fetch(self, max_rows)
    }
}

pub struct FakeConnection {
    table: RecordTable,
    pooled: bool,
}

impl FakeConnection {
    fn direct(table: &RecordTable) -> Self {
        Self {
            table: table.clone(),
            pooled: false,
        }
    }

    fn checked_out(table: &RecordTable) -> Self {
        let mut stats = lock(&table.stats);
        stats.checkouts += 1;
        stats.outstanding += 1;
        drop(stats);
        Self {
            table: table.clone(),
            pooled: true,
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if self.pooled {
            lock(&self.table.stats).outstanding -= 1;
        }
    }
}

impl SyncConnection for FakeConnection {
    fn fetch_all(&mut self, limit: u64, _timeout: StatementTimeout) -> Result<u64, StrategyError> {
        Ok(self.table.rows_for(RecordQuery::Prefix { limit })? as u64)
    }

    fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        _timeout: StatementTimeout,
    ) -> Result<Box<dyn BatchCursor + 'c>, StrategyError> {
        Ok(Box::new(self.table.open(query)?))
    }
}

#[async_trait]
impl AsyncConnection for FakeConnection {
    async fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        _timeout: StatementTimeout,
    ) -> Result<Box<dyn AsyncBatchCursor + 'c>, StrategyError> {
        Ok(Box::new(self.table.open(query)?))
    }

    async fn fetch_ids(
        &mut self,
        range: IdRange,
        _timeout: StatementTimeout,
    ) -> Result<Vec<i64>, StrategyError> {
        Ok(self.table.ids_in(range))
    }
}

pub struct FakeSyncPool {
    table: RecordTable,
    closed: bool,
}

impl SyncPool for FakeSyncPool {
    fn checkout(&self) -> Result<Box<dyn SyncConnection + '_>, StrategyError> {
        Ok(Box::new(FakeConnection::checked_out(&self.table)))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.table.stats).pools_closed += 1;
        }
    }
}

pub struct FakeSyncConnector {
    table: RecordTable,
}

impl FakeSyncConnector {
    pub fn new(table: RecordTable) -> Self {
        Self { table }
    }
}

impl SyncConnector for FakeSyncConnector {
    fn connect(&self) -> Result<Box<dyn SyncConnection>, StrategyError> {
        self.table.connect()?;
        Ok(Box::new(FakeConnection::direct(&self.table)))
    }

    fn open_pool(&self, size: PoolSize) -> Result<Box<dyn SyncPool>, StrategyError> {
        self.table.connect()?;
        let mut stats = lock(&self.table.stats);
        stats.pools_opened += 1;
        stats.pool_sizes.push(size.max);
        drop(stats);
        Ok(Box::new(FakeSyncPool {
            table: self.table.clone(),
            closed: false,
        }))
    }
}

pub struct FakeAsyncPool {
    table: RecordTable,
    closed: AtomicBool,
}

#[async_trait]
impl AsyncPool for FakeAsyncPool {
    async fn acquire(&self) -> Result<Box<dyn AsyncConnection>, StrategyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrategyError::connectivity("pool is closed"));
        }
        Ok(Box::new(FakeConnection::checked_out(&self.table)))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.table.stats).pools_closed += 1;
        }
    }
}

pub struct FakeAsyncConnector {
    table: RecordTable,
}

impl FakeAsyncConnector {
    pub fn new(table: RecordTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl AsyncConnector for FakeAsyncConnector {
    async fn connect(&self) -> Result<Box<dyn AsyncConnection>, StrategyError> {
        self.table.connect()?;
        Ok(Box::new(FakeConnection::direct(&self.table)))
    }

    async fn open_pool(&self, max_size: usize) -> Result<Arc<dyn AsyncPool>, StrategyError> {
        self.table.connect()?;
        let mut stats = lock(&self.table.stats);
        stats.pools_opened += 1;
        stats.pool_sizes.push(max_size);
        drop(stats);
        Ok(Arc::new(FakeAsyncPool {
            table: self.table.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Worker launcher answering from the table instead of a child process.
pub struct FakeWorkers {
    table: RecordTable,
    tasks: Mutex<Vec<ChunkTask>>,
}

impl FakeWorkers {
    pub fn new(table: RecordTable) -> Self {
        Self {
            table,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<ChunkTask> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl WorkerLauncher for FakeWorkers {
    async fn run_chunk(&self, task: ChunkTask) -> Result<u64, StrategyError> {
        let rows = self.table.rows_for(RecordQuery::Keys(&task.ids))?;
        lock(&self.tasks).push(task);
        Ok(rows as u64)
    }
}

/// Probe replaying a fixed RSS script, then repeating `baseline`.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<u64>>,
    baseline: u64,
    calls: AtomicUsize,
    cpu_step: Duration,
}

impl ScriptedProbe {
    pub fn new(baseline: u64, script: impl IntoIterator<Item = u64>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            baseline,
            calls: AtomicUsize::new(0),
            cpu_step: Duration::ZERO,
        }
    }

    pub fn constant(rss_bytes: u64) -> Self {
        Self::new(rss_bytes, [])
    }

    /// Each snapshot reports `step` more cumulative CPU time than the last.
    pub fn with_cpu_step(mut self, step: Duration) -> Self {
        self.cpu_step = step;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceProbe for ScriptedProbe {
    fn snapshot(&self, _include_children: bool) -> ResourceSnapshot {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let rss_bytes = lock(&self.script).pop_front().unwrap_or(self.baseline);
        ResourceSnapshot {
            rss_bytes,
            cpu_time: Some(self.cpu_step * call as u32),
        }
    }
}

#[derive(Default)]
pub struct FixedTracker {
    pub peak: AtomicU64,
    pub resets: AtomicUsize,
}

impl AllocationTracker for FixedTracker {
    fn reset_peak(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn peak_bytes(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }
}

/// What a scripted strategy does on each `execute`.
#[derive(Debug, Clone)]
pub enum Step {
    Rows(u64),
    Fail(StrategyError),
    Partial(u64, Vec<ChunkFailure>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created(usize, StrategyKind),
    Executed(usize, u64),
    Closed(usize),
}

/// Factory handing out strategies that replay a per-kind script.
///
/// Every created instance gets a sequential id so lifecycle events can be
/// traced back to the instance that produced them.
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<StrategyKind, VecDeque<Step>>>,
    fallback: Step,
    closeable: bool,
    close_error: Option<StrategyError>,
    events: Arc<Mutex<Vec<Event>>>,
    next_id: AtomicUsize,
}

impl ScriptedFactory {
    /// Every execution returns `rows` unless a script says otherwise.
    pub fn returning(rows: u64) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Step::Rows(rows),
            closeable: true,
            close_error: None,
            events: Arc::default(),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn script(self, kind: StrategyKind, steps: impl IntoIterator<Item = Step>) -> Self {
        lock(&self.scripts)
            .entry(kind)
            .or_default()
            .extend(steps);
        self
    }

    pub fn without_close(mut self) -> Self {
        self.closeable = false;
        self
    }

    pub fn failing_close(mut self, error: StrategyError) -> Self {
        self.close_error = Some(error);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }
}

impl StrategyFactory for ScriptedFactory {
    fn create(&self, kind: StrategyKind) -> Result<Box<dyn Strategy>, StrategyError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push(Event::Created(id, kind));
        let step = lock(&self.scripts)
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedStrategy {
            id,
            kind,
            step,
            closeable: self.closeable,
            close_error: self.close_error.clone(),
            events: Arc::clone(&self.events),
        }))
    }
}

struct ScriptedStrategy {
    id: usize,
    kind: StrategyKind,
    step: Step,
    closeable: bool,
    close_error: Option<StrategyError>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Strategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        lock(&self.events).push(Event::Executed(self.id, limit));
        match self.step.clone() {
            Step::Rows(rows) => Ok(Execution::rows(rows)),
            Step::Fail(error) => Err(error),
            Step::Partial(rows, failures) => Ok(Execution {
                chunk_failures: failures,
                ..Execution::rows(rows)
            }),
        }
    }

    fn closer(&mut self) -> Option<&mut dyn Closeable> {
        if self.closeable { Some(self) } else { None }
    }
}

impl Closeable for ScriptedStrategy {
    fn close(&mut self) -> Result<(), StrategyError> {
        lock(&self.events).push(Event::Closed(self.id));
        match self.close_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
