//! Bounded-concurrency download scheduler
//!
//! A fixed pool of workers shares one cursor over the backlog. Each worker
//! claims the next unclaimed item, streams it into memory, hands the bytes to
//! the observer and claims again, so exactly `min(n, max_concurrency)`
//! transfers are in flight until the backlog runs dry.

use crate::config::{ProgressWeighting, TransferConfig};
use crate::error::{TransferError, TransferResult};
use crate::negotiator::SessionNegotiator;
use crate::progress::{ProgressBoard, ProgressCell, ProgressReporter};
use crate::types::{DownloadTask, TaskState, TransferItem};
use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use futures_util::{FutureExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Client;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Largest buffer reserved up front from a content-length header.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Selects items that must be claimed before the rest of the backlog.
pub type PrimaryPredicate<'a> = &'a (dyn Fn(&TransferItem) -> bool + Send + Sync);

/// Receives download events. Callbacks may run on any worker thread and items
/// arrive in completion order, not request order.
pub trait LoadObserver: Send + Sync {
    /// Aggregate progress of the whole batch, only ever increasing.
    fn on_progress(&self, _percent: u8) {}

    fn on_item_progress(&self, _name: &str, _percent: f64) {}

    /// Ownership of the downloaded bytes passes to the observer.
    fn on_item_ready(&self, name: &str, bytes: Bytes);

    fn on_item_failed(&self, _name: &str, _error: &TransferError) {}
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Item names in planned order, after priority reordering and the cap.
    pub backlog: Vec<String>,
    /// Item names in the order workers actually claimed them.
    pub claimed: Vec<String>,
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Final state of every task, in backlog order.
    pub tasks: Vec<DownloadTask>,
    /// Highest number of transfers observed in flight at once.
    pub peak_active: usize,
    pub aggregate: u8,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn state_of(&self, name: &str) -> Option<TaskState> {
        self.tasks
            .iter()
            .find(|task| task.item.name == name)
            .map(|task| task.state)
    }
}

/// Order the backlog so primary items come first (stable), then keep at most `cap`.
pub fn plan_backlog(
    items: Vec<TransferItem>,
    primary: Option<PrimaryPredicate<'_>>,
    cap: Option<usize>,
) -> Vec<TransferItem> {
    let mut backlog = match primary {
        Some(is_primary) => {
            let (mut first, rest): (Vec<_>, Vec<_>) =
                items.into_iter().partition(|item| is_primary(item));
            first.extend(rest);
            first
        }
        None => items,
    };
    if let Some(cap) = cap {
        backlog.truncate(cap);
    }
    backlog
}

enum Slot {
    Pending(DownloadTask),
    /// Owned by a worker; the item is kept so the task can be rebuilt if the
    /// worker never hands it back.
    Claimed(TransferItem),
    Finished(DownloadTask, Option<String>),
}

impl Slot {
    fn take_pending(&mut self) -> Option<DownloadTask> {
        let item = match self {
            Slot::Pending(task) => task.item.clone(),
            _ => return None,
        };
        match std::mem::replace(self, Slot::Claimed(item)) {
            Slot::Pending(task) => Some(task),
            _ => None,
        }
    }
}

struct Pool {
    slots: Vec<Mutex<Slot>>,
    /// Cell `i` is written only by the worker that claimed slot `i`, and by
    /// the scheduler once every worker has stopped.
    cells: Vec<ProgressCell>,
    claimed: Mutex<Vec<String>>,
    cursor: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl Pool {
    /// Atomically claim the next unclaimed task, or `None` once the backlog is exhausted.
    fn claim(&self) -> Option<(usize, DownloadTask)> {
        let mut claimed = lock(&self.claimed);
        loop {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let slot = self.slots.get(index)?;
            if let Some(task) = lock(slot).take_pending() {
                claimed.push(task.item.name.clone());
                return Some((index, task));
            }
        }
    }

    fn finish(&self, index: usize, task: DownloadTask, error: Option<String>) {
        *lock(&self.slots[index]) = Slot::Finished(task, error);
    }

    /// Final task and error for slot `index`. Slots no worker finished are
    /// failed here and their cells forced to 100.
    fn settle(&self, index: usize, observer: &dyn LoadObserver) -> (DownloadTask, Option<String>) {
        let (mut task, reason) = match &*lock(&self.slots[index]) {
            Slot::Finished(task, error) => return (task.clone(), error.clone()),
            Slot::Pending(task) => (task.clone(), "never claimed"),
            Slot::Claimed(item) => (DownloadTask::new(item.clone()), "worker stopped mid-transfer"),
        };

        task.state = TaskState::Failed;
        self.cells[index].complete();
        let err = TransferError::transport(&task.item.name, None, reason);
        warn!("load_item_abandoned: {} error={}", task.item.name, err);
        shield(&task.item.name, || observer.on_item_failed(&task.item.name, &err));
        (task, Some(err.to_string()))
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run an observer callback, containing any panic it raises.
fn shield(name: &str, callback: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(callback)) {
        warn!(
            "load_observer_panicked: {} error={}",
            name,
            panic_message(&*payload)
        );
    }
}

pub struct DownloadScheduler {
    negotiator: Arc<dyn SessionNegotiator>,
    client: Client,
    max_concurrency: usize,
    backlog_cap: Option<usize>,
    weighting: ProgressWeighting,
}

impl DownloadScheduler {
    pub fn new(
        negotiator: Arc<dyn SessionNegotiator>,
        client: Client,
        config: &TransferConfig,
    ) -> Self {
        Self {
            negotiator,
            client,
            max_concurrency: config.download_concurrency.max(1),
            backlog_cap: config.backlog_cap,
            weighting: config.progress_weighting,
        }
    }

    /// Download every item of the (reordered, capped) backlog.
    ///
    /// Individual item failures, including a panicking observer callback, are
    /// reported through the observer and the returned report; they never fail
    /// the call.
    pub async fn load_all(
        &self,
        items: Vec<TransferItem>,
        primary: Option<PrimaryPredicate<'_>>,
        observer: Arc<dyn LoadObserver>,
    ) -> TransferResult<LoadReport> {
        let start_time = Instant::now();
        let backlog = plan_backlog(items, primary, self.backlog_cap);
        let names: Vec<String> = backlog.iter().map(|item| item.name.clone()).collect();

        let (board, cells) = ProgressBoard::new(
            backlog
                .iter()
                .map(|item| (item.name.clone(), item.total_bytes)),
            self.weighting,
        );
        let progress_observer = observer.clone();
        let reporter = Arc::new(ProgressReporter::new(
            board.clone(),
            Some(Arc::new(move |p: u8| progress_observer.on_progress(p))),
        ));

        let pool = Arc::new(Pool {
            slots: backlog
                .into_iter()
                .map(|item| Mutex::new(Slot::Pending(DownloadTask::new(item))))
                .collect(),
            cells,
            claimed: Mutex::new(Vec::with_capacity(names.len())),
            cursor: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let workers = std::cmp::min(names.len(), self.max_concurrency);
        info!(
            "load_start: items={} workers={} cap={:?}",
            names.len(),
            workers,
            self.backlog_cap
        );
        shield("load", || {
            reporter.report();
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let pool = pool.clone();
            let negotiator = self.negotiator.clone();
            let client = self.client.clone();
            let reporter = reporter.clone();
            let observer = observer.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, pool, negotiator, client, reporter, observer).await
            }));
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("load_worker_stopped: error={}", e);
            }
        }

        let mut report = LoadReport {
            backlog: names,
            claimed: std::mem::take(&mut *lock(&pool.claimed)),
            ..LoadReport::default()
        };
        for index in 0..pool.slots.len() {
            let (task, error) = pool.settle(index, observer.as_ref());
            match error {
                None => report.delivered.push(task.item.name.clone()),
                Some(err) => report.failed.push((task.item.name.clone(), err)),
            }
            report.tasks.push(task);
        }
        report.peak_active = pool.peak.load(Ordering::SeqCst);
        report.aggregate = board.aggregate();
        shield("load", || {
            reporter.report();
        });

        info!(
            "load_finish: delivered={} failed={} peak_active={} elapsed_ms={}",
            report.delivered.len(),
            report.failed.len(),
            report.peak_active,
            start_time.elapsed().as_millis()
        );
        Ok(report)
    }
}

async fn run_worker(
    worker_id: usize,
    pool: Arc<Pool>,
    negotiator: Arc<dyn SessionNegotiator>,
    client: Client,
    reporter: Arc<ProgressReporter>,
    observer: Arc<dyn LoadObserver>,
) {
    while let Some((index, mut task)) = pool.claim() {
        let name = task.item.name.clone();
        let cell = &pool.cells[index];
        debug!("load_item_claimed: {} worker={}", name, worker_id);

        pool.enter();
        task.state = TaskState::Active;
        let attempt = AssertUnwindSafe(async {
            let bytes = fetch_item(
                &client,
                negotiator.as_ref(),
                &mut task,
                cell,
                &reporter,
                observer.as_ref(),
            )
            .await?;
            cell.complete();
            reporter.report();
            debug!(
                "load_item_done: {} bytes={} worker={}",
                name,
                bytes.len(),
                worker_id
            );
            observer.on_item_ready(&name, bytes);
            Ok::<(), TransferError>(())
        })
        .catch_unwind()
        .await;
        pool.leave();

        let error = match attempt {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(TransferError::transport(
                &name,
                None,
                format!("panicked: {}", panic_message(&*payload)),
            )),
        };

        match error {
            None => {
                task.state = TaskState::Done;
                pool.finish(index, task, None);
            }
            Some(err) => {
                // A failed item counts as finished so the aggregate cannot stall.
                task.state = TaskState::Failed;
                cell.complete();
                warn!("load_item_failed: {} error={}", name, err);
                shield(&name, || {
                    reporter.report();
                    observer.on_item_failed(&name, &err);
                });
                pool.finish(index, task, Some(err.to_string()));
            }
        }
    }
}

async fn fetch_item(
    client: &Client,
    negotiator: &dyn SessionNegotiator,
    task: &mut DownloadTask,
    cell: &ProgressCell,
    reporter: &ProgressReporter,
    observer: &dyn LoadObserver,
) -> TransferResult<Bytes> {
    let name = task.item.name.clone();
    let url = negotiator.issue_download_url(&name).await?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| TransferError::transport(&name, None, e))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(TransferError::transport(
            &name,
            None,
            format!("{} - {}", status, text),
        ));
    }

    // With neither a content-length nor a size hint the item only reports 0 or 100.
    let total_bytes = response
        .content_length()
        .filter(|len| *len > 0)
        .unwrap_or(task.item.total_bytes);
    if total_bytes > 0 && total_bytes != task.item.total_bytes {
        task.item.total_bytes = total_bytes;
        cell.set_weight(total_bytes);
    }

    let mut buffer = BytesMut::with_capacity(total_bytes.min(MAX_PREALLOC) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransferError::transport(&name, None, e))?;
        buffer.extend_from_slice(&chunk);
        task.bytes_loaded += chunk.len() as u64;

        if total_bytes > 0 {
            cell.set_fraction(task.bytes_loaded.min(total_bytes), total_bytes);
            observer.on_item_progress(&name, cell.percent());
            reporter.report();
        }
    }

    Ok(buffer.freeze())
}
