//! Publishing: running units through validation, the next-use scan and hint emission, producing
//! [Artifact]s.
//!
//! Units are independent of one another, so [Publisher::publish_all] hands them out to worker
//! threads from a shared queue. Each worker analyses one unit at a time with its own state; only
//! the queue, the results and the statistics are shared.

use crate::{
    chill::{analyse_valid, emit, ChillTable},
    config::Config,
    errors::ChillError,
    log::{
        log_ir, should_log_ir,
        stats::{Stats, TimingState},
        IRPhase, Log, Verbosity,
    },
    unit::Unit,
};
use parking_lot::Mutex;
use std::{cmp, collections::VecDeque, error::Error, thread};

/// A published unit: the unit itself and, unless they have been stripped, its chill hints.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    unit: Unit,
    hints: Option<ChillTable>,
}

impl Artifact {
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// The chill hints for [Self::unit], if they haven't been stripped.
    pub fn hints(&self) -> Option<&ChillTable> {
        self.hints.as_ref()
    }

    /// Remove this artifact's hints. The unit is unaffected: hints are never needed to run it.
    pub fn strip_hints(self) -> Self {
        Self {
            unit: self.unit,
            hints: None,
        }
    }

    pub fn into_parts(self) -> (Unit, Option<ChillTable>) {
        (self.unit, self.hints)
    }
}

pub struct Publisher {
    config: Config,
    log: Log,
    stats: Stats,
}

impl Publisher {
    /// Create a publisher with configuration `config`. Logging and statistics are still
    /// controlled by `YKCHILL_LOG` and `YKCHILL_LOG_STATS`.
    pub fn new(config: Config) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            config,
            log: Log::new()?,
            stats: Stats::new(),
        })
    }

    /// Create a publisher configured entirely from the environment.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::new(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate `unit`, compute its chill hints, and bundle the two together.
    pub fn publish(&self, unit: Unit) -> Result<Artifact, ChillError> {
        let r = self.chill(&unit);
        self.stats.timing_state(TimingState::None);
        match r {
            Ok(ct) => {
                self.stats.unit_ok(ct.num_hints(), ct.num_entries());
                self.log.log(
                    Verbosity::UnitEvent,
                    &format!(
                        "published {}: {} hints, {} entries",
                        unit.name(),
                        ct.num_hints(),
                        ct.num_entries()
                    ),
                );
                if self.log.enabled(Verbosity::HintEvent) {
                    for (iidx, h) in ct.iter_hints() {
                        let entries = h
                            .entries()
                            .iter()
                            .map(|x| x.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.log.log(
                            Verbosity::HintEvent,
                            &format!("{} %{iidx}: chill {entries}", unit.name()),
                        );
                    }
                }
                Ok(Artifact {
                    unit,
                    hints: Some(ct),
                })
            }
            Err(e) => {
                self.stats.unit_err();
                self.log
                    .log(Verbosity::Error, &format!("rejected {}: {e}", unit.name()));
                Err(e)
            }
        }
    }

    fn chill(&self, unit: &Unit) -> Result<ChillTable, ChillError> {
        unit.edition().expect(self.config.edition)?;
        if should_log_ir(IRPhase::Unit) {
            log_ir(&format!(
                "--- Begin unit: {} ---\n{unit}--- End unit ---\n",
                unit.name()
            ));
        }

        self.stats.timing_state(TimingState::Validating);
        unit.validate()?;

        self.stats.timing_state(TimingState::Scanning);
        let t = analyse_valid(unit);
        if should_log_ir(IRPhase::NextUse) {
            log_ir(&format!(
                "--- Begin next_use: {} ---\n{t}--- End next_use ---\n",
                unit.name()
            ));
        }

        self.stats.timing_state(TimingState::Emitting);
        let ct = emit(unit, &t, self.config.min_chill_dist);
        if should_log_ir(IRPhase::Hints) {
            log_ir(&format!(
                "--- Begin hints: {} ---\n{ct}--- End hints ---\n",
                unit.name()
            ));
        }
        Ok(ct)
    }

    /// Publish every unit in `units`, using up to [Config::jobs] worker threads. The results are
    /// in the same order as `units`.
    pub fn publish_all(&self, units: Vec<Unit>) -> Vec<Result<Artifact, ChillError>> {
        let num_units = units.len();
        if num_units == 0 {
            self.log.log(Verbosity::Warning, "publish_all called with no units");
            return Vec::new();
        }
        let queue = Mutex::new(units.into_iter().enumerate().collect::<VecDeque<_>>());
        let results = Mutex::new(
            (0..num_units)
                .map(|_| None)
                .collect::<Vec<Option<Result<Artifact, ChillError>>>>(),
        );
        let num_workers = cmp::max(1, cmp::min(self.config.jobs, num_units));
        thread::scope(|s| {
            for _ in 0..num_workers {
                s.spawn(|| loop {
                    let Some((i, unit)) = queue.lock().pop_front() else {
                        break;
                    };
                    let r = self.publish(unit);
                    results.lock()[i] = Some(r);
                });
            }
        });
        // A worker that panics takes this thread down with it when the scope ends, so by now every
        // slot has been filled.
        results.into_inner().into_iter().flatten().collect()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stats.output();
    }
}
