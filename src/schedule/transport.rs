//! Transports: how work units reach workers and completions come back.
//!
//! The coordinator only sees [`Transport::dispatch`] and
//! [`Transport::next_completion`]. [`PoolTransport`] runs units on a rayon
//! thread pool and returns results over a single crossbeam channel.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{HazardError, Result};
use crate::work::{CompletionSignal, WorkUnit, Worker, WorkerFailure};

pub trait Transport {
    /// Hand a unit to a worker. Must not block on the computation.
    fn dispatch(&mut self, unit: WorkUnit) -> Result<()>;

    /// Block until some dispatched unit completes.
    fn next_completion(&mut self) -> Result<CompletionSignal>;
}

pub struct PoolTransport {
    pool: ThreadPool,
    worker: Arc<dyn Worker>,
    tx: Sender<CompletionSignal>,
    rx: Receiver<CompletionSignal>,
}

impl PoolTransport {
    /// `threads == 0` uses one thread per core. `capacity` bounds the
    /// completion channel and should be at least the dispatch budget.
    pub fn new(worker: Arc<dyn Worker>, threads: usize, capacity: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hz-worker-{i}"))
            .build()
            .map_err(|e| HazardError::Transport(format!("cannot start worker pool: {e}")))?;
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Ok(Self {
            pool,
            worker,
            tx,
            rx,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Transport for PoolTransport {
    fn dispatch(&mut self, unit: WorkUnit) -> Result<()> {
        let worker = Arc::clone(&self.worker);
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let realization = unit.realization;
            let units_completed = unit.len();
            let payload = catch_unwind(AssertUnwindSafe(|| worker.compute(&unit)))
                .unwrap_or_else(|panic| Err(WorkerFailure::new(panic_message(panic.as_ref()))));
            // The coordinator stops listening after a fatal error.
            let _ = tx.send(CompletionSignal {
                realization,
                units_completed,
                payload,
            });
        });
        Ok(())
    }

    fn next_completion(&mut self) -> Result<CompletionSignal> {
        self.rx
            .recv()
            .map_err(|e| HazardError::Transport(format!("completion channel closed: {e}")))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use nalgebra::DMatrix;

    use super::*;
    use crate::domain::Imt;
    use crate::work::PartialCurves;

    struct Panicky;

    impl Worker for Panicky {
        fn compute(&self, unit: &WorkUnit) -> std::result::Result<PartialCurves, WorkerFailure> {
            if unit.realization == 1 {
                panic!("bad source");
            }
            let mut out = BTreeMap::new();
            out.insert(Imt::new("PGA"), DMatrix::from_element(1, 1, 0.5));
            Ok(out)
        }
    }

    fn unit(realization: usize) -> WorkUnit {
        WorkUnit {
            realization,
            batch: Vec::new(),
            gsims: Arc::new(BTreeMap::new()),
        }
    }

    #[test]
    fn pool_delivers_one_signal_per_unit_and_catches_panics() {
        let mut transport = PoolTransport::new(Arc::new(Panicky), 2, 4).unwrap();
        assert_eq!(transport.threads(), 2);
        transport.dispatch(unit(0)).unwrap();
        transport.dispatch(unit(1)).unwrap();

        let mut signals = vec![
            transport.next_completion().unwrap(),
            transport.next_completion().unwrap(),
        ];
        signals.sort_by_key(|s| s.realization);
        assert!(signals[0].payload.is_ok());
        let failure = signals[1].payload.as_ref().unwrap_err();
        assert!(failure.message.contains("bad source"));
    }
}
