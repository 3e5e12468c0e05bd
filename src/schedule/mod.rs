//! Bounded dispatch of work units and completion handling.
//!
//! The scheduler is the coordinator's control loop:
//!
//! - fill the budget round-robin across realizations with outstanding work
//! - block on the transport for the next completion
//! - hand successful payloads to the [`Aggregator`] and refill one unit
//! - abort the job on the first worker error
//!
//! State: `Idle → Dispatching → Draining → Done`, or `Failed`.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::aggregate::Aggregator;
use crate::error::{HazardError, Result};
use crate::work::{WorkStream, WorkUnit};

pub mod transport;

pub use transport::{PoolTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    /// Work remains to be pulled.
    Dispatching,
    /// Every stream is exhausted; waiting for in-flight units.
    Draining,
    Done,
    Failed,
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub dispatched: usize,
    pub completed: usize,
    pub max_in_flight: usize,
}

pub struct Scheduler<T: Transport> {
    transport: T,
    budget: usize,
    streams: Vec<WorkStream>,
    position: HashMap<usize, usize>,
    cursor: usize,
    in_flight: usize,
    state: JobState,
    summary: ScheduleSummary,
}

impl<T: Transport> Scheduler<T> {
    /// `budget` is the maximum number of units in flight (at least 1).
    pub fn new(transport: T, budget: usize, streams: Vec<WorkStream>) -> Self {
        let position = streams
            .iter()
            .enumerate()
            .map(|(i, s)| (s.realization(), i))
            .collect();
        Self {
            transport,
            budget: budget.max(1),
            streams,
            position,
            cursor: 0,
            in_flight: 0,
            state: JobState::Idle,
            summary: ScheduleSummary::default(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn summary(&self) -> ScheduleSummary {
        self.summary
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Drive every stream to completion, feeding results into `aggregator`.
    pub fn run(&mut self, aggregator: &mut Aggregator) -> Result<ScheduleSummary> {
        self.state = JobState::Dispatching;
        info!(
            streams = self.streams.len(),
            budget = self.budget,
            "Dispatching work"
        );

        while self.in_flight < self.budget {
            match self.pull_round_robin() {
                Some(unit) => self.dispatch(unit)?,
                None => {
                    self.begin_draining();
                    break;
                }
            }
        }

        while self.in_flight > 0 {
            let signal = match self.transport.next_completion() {
                Ok(signal) => signal,
                Err(err) => return Err(self.fail(err)),
            };
            self.in_flight -= 1;
            self.summary.completed += 1;

            let curves = match signal.payload {
                Ok(curves) => curves,
                Err(failure) => {
                    return Err(self.fail(HazardError::worker(signal.realization, failure.message)));
                }
            };
            match aggregator.record(signal.realization, signal.units_completed, &curves) {
                Ok(true) => info!(realization = signal.realization, "Realization complete"),
                Ok(false) => {}
                Err(err) => return Err(self.fail(err)),
            }

            if self.state == JobState::Dispatching {
                let next = self
                    .pull_from(signal.realization)
                    .or_else(|| self.pull_round_robin());
                match next {
                    Some(unit) => self.dispatch(unit)?,
                    None => self.begin_draining(),
                }
            }
        }

        self.state = JobState::Done;
        info!(
            dispatched = self.summary.dispatched,
            max_in_flight = self.summary.max_in_flight,
            "Job done"
        );
        Ok(self.summary)
    }

    fn dispatch(&mut self, unit: WorkUnit) -> Result<()> {
        debug!(
            realization = unit.realization,
            items = unit.len(),
            in_flight = self.in_flight + 1,
            "Dispatch"
        );
        if let Err(err) = self.transport.dispatch(unit) {
            return Err(self.fail(err));
        }
        self.in_flight += 1;
        self.summary.dispatched += 1;
        self.summary.max_in_flight = self.summary.max_in_flight.max(self.in_flight);
        Ok(())
    }

    fn pull_from(&mut self, realization: usize) -> Option<WorkUnit> {
        let idx = *self.position.get(&realization)?;
        self.streams[idx].next()
    }

    /// Next unit from the first stream at or after the cursor that has one.
    fn pull_round_robin(&mut self) -> Option<WorkUnit> {
        let n = self.streams.len();
        for k in 0..n {
            let idx = (self.cursor + k) % n;
            if let Some(unit) = self.streams[idx].next() {
                self.cursor = (idx + 1) % n;
                return Some(unit);
            }
        }
        None
    }

    fn begin_draining(&mut self) {
        if self.state == JobState::Dispatching {
            debug!(in_flight = self.in_flight, "All work dispatched, draining");
            self.state = JobState::Draining;
        }
    }

    fn fail(&mut self, err: HazardError) -> HazardError {
        error!(in_flight = self.in_flight, error = %err, "Job failed");
        self.state = JobState::Failed;
        err
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};

    use nalgebra::DMatrix;

    use super::*;
    use crate::domain::{HazardGrid, Imt, Location, Realization, SourceItem, SourceType};
    use crate::work::{CompletionSignal, PartialCurves, WorkerFailure};

    /// Completes units on demand in a configurable order.
    struct ScriptedTransport {
        pending: VecDeque<WorkUnit>,
        lifo: bool,
        fail_realization: Option<usize>,
        in_flight: usize,
        max_in_flight: usize,
    }

    impl ScriptedTransport {
        fn new(lifo: bool) -> Self {
            Self {
                pending: VecDeque::new(),
                lifo,
                fail_realization: None,
                in_flight: 0,
                max_in_flight: 0,
            }
        }
    }

    fn per_item_poe(unit: &WorkUnit) -> PartialCurves {
        // Each item contributes 0.1 to every cell.
        let p = 1.0 - 0.9f64.powi(unit.len() as i32);
        let mut out = BTreeMap::new();
        out.insert(Imt::new("PGA"), DMatrix::from_element(2, 3, p));
        out
    }

    impl Transport for ScriptedTransport {
        fn dispatch(&mut self, unit: WorkUnit) -> Result<()> {
            self.in_flight += 1;
            self.max_in_flight = self.max_in_flight.max(self.in_flight);
            self.pending.push_back(unit);
            Ok(())
        }

        fn next_completion(&mut self) -> Result<CompletionSignal> {
            let unit = if self.lifo {
                self.pending.pop_back()
            } else {
                self.pending.pop_front()
            }
            .ok_or_else(|| HazardError::Transport("nothing in flight".into()))?;
            self.in_flight -= 1;
            let payload = if Some(unit.realization) == self.fail_realization {
                Err(WorkerFailure::new("synthetic failure"))
            } else {
                Ok(per_item_poe(&unit))
            };
            Ok(CompletionSignal {
                realization: unit.realization,
                units_completed: unit.len(),
                payload,
            })
        }
    }

    fn grid() -> HazardGrid {
        let mut imts = BTreeMap::new();
        imts.insert(Imt::new("PGA"), vec![0.1, 0.2, 0.4]);
        HazardGrid {
            sites: vec![
                Location { lon: 0.0, lat: 0.0 },
                Location { lon: 1.0, lat: 1.0 },
            ],
            imts,
        }
    }

    fn items(n: usize) -> Vec<SourceItem> {
        (0..n)
            .map(|i| SourceItem {
                id: format!("s{i}"),
                tectonic_region_type: "ASC".into(),
                source_type: SourceType::Point,
                lon: 0.0,
                lat: 0.0,
                a_value: 3.0,
                b_value: 1.0,
                min_magnitude: 5.0,
                max_magnitude: 6.0,
            })
            .collect()
    }

    fn realization(ordinal: usize) -> Realization {
        Realization {
            ordinal,
            path: vec![format!("b{ordinal}")],
            gsim_path: Vec::new(),
            source_model: None,
            adjustments: Vec::new(),
            gsims: BTreeMap::new(),
            weight: Some(1.0 / 3.0),
        }
    }

    /// Three realizations with 5, 0 and 9 sources.
    fn setup(batch_size: usize) -> (Vec<WorkStream>, Aggregator) {
        let mut agg = Aggregator::new(grid());
        let streams: Vec<WorkStream> = [5, 0, 9]
            .iter()
            .enumerate()
            .map(|(i, &n)| WorkStream::new(i, items(n), BTreeMap::new(), batch_size))
            .collect();
        for s in &streams {
            agg.register(&realization(s.realization()), s.total());
        }
        (streams, agg)
    }

    fn run(lifo: bool, budget: usize, batch_size: usize) -> (Vec<(usize, f64)>, ScheduleSummary, usize) {
        let (streams, mut agg) = setup(batch_size);
        let mut scheduler = Scheduler::new(ScriptedTransport::new(lifo), budget, streams);
        let summary = scheduler.run(&mut agg).unwrap();
        assert_eq!(scheduler.state(), JobState::Done);
        assert_eq!(scheduler.in_flight(), 0);
        let max_seen = scheduler.into_transport().max_in_flight;
        let finals = agg
            .into_finalized()
            .iter()
            .map(|f| (f.realization, f.curves[&Imt::new("PGA")][(1, 2)]))
            .collect();
        (finals, summary, max_seen)
    }

    #[test]
    fn every_realization_finalizes_with_order_independent_curves() {
        let (fifo, summary, _) = run(false, 3, 2);
        let (lifo, _, _) = run(true, 2, 4);
        assert_eq!(fifo.len(), 3);
        assert_eq!(summary.dispatched, 3 + 5);
        assert_eq!(summary.completed, summary.dispatched);
        for ((ra, a), (rb, b)) in fifo.iter().zip(&lifo) {
            assert_eq!(ra, rb);
            assert!((a - b).abs() < 1e-12);
        }
        assert!((fifo[0].1 - (1.0 - 0.9f64.powi(5))).abs() < 1e-12);
        assert_eq!(fifo[1].1, 0.0);
        assert!((fifo[2].1 - (1.0 - 0.9f64.powi(9))).abs() < 1e-12);
    }

    #[test]
    fn in_flight_never_exceeds_budget() {
        for budget in [1, 2, 3, 10] {
            let (_, summary, max_seen) = run(true, budget, 1);
            assert!(max_seen <= budget, "budget {budget}: {max_seen}");
            assert_eq!(summary.max_in_flight, max_seen);
            assert_eq!(summary.dispatched, 14);
        }
    }

    #[test]
    fn worker_error_fails_the_job() {
        let (streams, mut agg) = setup(2);
        let mut transport = ScriptedTransport::new(false);
        transport.fail_realization = Some(2);
        let mut scheduler = Scheduler::new(transport, 4, streams);
        let err = scheduler.run(&mut agg).unwrap_err();
        assert!(matches!(err, HazardError::Worker { realization: 2, .. }));
        assert_eq!(scheduler.state(), JobState::Failed);
    }

    #[test]
    fn duplicate_completion_fails_the_job() {
        struct Duplicating(ScriptedTransport, Option<CompletionSignal>);

        impl Transport for Duplicating {
            fn dispatch(&mut self, unit: WorkUnit) -> Result<()> {
                self.0.dispatch(unit)
            }

            fn next_completion(&mut self) -> Result<CompletionSignal> {
                if let Some(signal) = self.1.take() {
                    return Ok(signal);
                }
                let signal = self.0.next_completion()?;
                self.1 = Some(signal.clone());
                Ok(signal)
            }
        }

        let mut agg = Aggregator::new(grid());
        let stream = WorkStream::new(0, items(2), BTreeMap::new(), 2);
        agg.register(&realization(0), stream.total());
        let mut scheduler = Scheduler::new(
            Duplicating(ScriptedTransport::new(false), None),
            2,
            vec![stream, WorkStream::new(1, items(2), BTreeMap::new(), 1)],
        );
        agg.register(&realization(1), 2);
        let err = scheduler.run(&mut agg).unwrap_err();
        assert!(matches!(
            err,
            HazardError::ProgressOverrun {
                realization: 0,
                already_complete: true,
                ..
            }
        ));
        assert_eq!(scheduler.state(), JobState::Failed);
    }

    #[test]
    fn no_work_is_done_immediately() {
        let mut agg = Aggregator::new(grid());
        let mut scheduler = Scheduler::new(ScriptedTransport::new(false), 4, Vec::new());
        let summary = scheduler.run(&mut agg).unwrap();
        assert_eq!(summary.dispatched, 0);
        assert_eq!(scheduler.state(), JobState::Done);
    }
}
