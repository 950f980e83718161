use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::bounded;

use crate::cancel::CancellationToken;
use crate::error::{Result, StevedoreError};

/// What a worker failure does to the rest of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop dispatching new units; in-flight units drain.
    Abort,
    /// Keep processing every unit; failures are collected.
    Continue,
}

/// Run `f` over `items` on a bounded pool of `workers` threads.
///
/// Units are dispatched through a bounded channel; on cancellation the
/// in-flight units complete, no new units are dispatched, and the call
/// returns `Cancelled`. Otherwise the first worker error is returned (per
/// [`FailurePolicy`], later units may still have run). On success returns
/// the number of units processed.
pub fn run_parallel<T, F>(
    workers: usize,
    items: Vec<T>,
    cancel: &CancellationToken,
    policy: FailurePolicy,
    f: F,
) -> Result<usize>
where
    T: Send,
    F: Fn(T) -> Result<()> + Sync,
{
    let workers = workers.max(1);
    let aborted = AtomicBool::new(false);
    let processed = AtomicUsize::new(0);
    let first_error: Mutex<Option<StevedoreError>> = Mutex::new(None);

    let (tx, rx) = bounded::<T>(workers);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let aborted = &aborted;
            let processed = &processed;
            let first_error = &first_error;
            let f = &f;
            scope.spawn(move || {
                for item in rx.iter() {
                    match f(item) {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            if policy == FailurePolicy::Abort {
                                aborted.store(true, Ordering::SeqCst);
                            }
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            } else {
                                tracing::warn!(error = %e, "additional worker error");
                            }
                        }
                    }
                }
            });
        }
        drop(rx);

        for item in items {
            if cancel.is_cancelled() || aborted.load(Ordering::SeqCst) {
                break;
            }
            if tx.send(item).is_err() {
                break;
            }
        }
        drop(tx); // workers drain and exit
    });

    cancel.check()?;
    if let Some(e) = first_error.lock().unwrap().take() {
        return Err(e);
    }
    Ok(processed.load(Ordering::Relaxed))
}
