//! Statistics about the units a [crate::Publisher] has processed. Durations are wall-clock time,
//! so they are only ever a rough guide.

use parking_lot::Mutex;
use std::{
    cell::Cell,
    env, fs,
    ops::DerefMut,
    time::{Duration, Instant},
};
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

/// Record statistics if the end user defines the environment variable `YKCHILL_LOG_STATS`.
pub(crate) struct Stats {
    // Most runs won't record statistics, so the common case is a check against `None` rather than
    // locking a `Mutex`.
    inner: Option<Mutex<StatsInner>>,
}

struct StatsInner {
    /// The path to write output. If exactly equal to `-`, output will be written to stderr.
    output_path: String,
    /// How many units were published successfully?
    units_ok: u64,
    /// How many units were rejected?
    units_err: u64,
    /// How many instructions, across all published units, have a non-empty hint?
    hints: u64,
    /// How many (instruction, register) entries, across all published units, were emitted?
    chill_entries: u64,
    /// The time spent in each [TimingState].
    durations: [Duration; TimingState::COUNT],
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::with_output(env::var("YKCHILL_LOG_STATS").ok())
    }

    /// Record statistics iff `output_path` is `Some`. A path of `-` means stderr.
    pub(crate) fn with_output(output_path: Option<String>) -> Self {
        Self {
            inner: output_path.map(|p| Mutex::new(StatsInner::new(p))),
        }
    }

    /// If statistics are being recorded, update `inner` by running the function `f`, otherwise
    /// return immediately without calling `f`.
    fn update_with<F>(&self, f: F)
    where
        F: FnOnce(&mut StatsInner),
    {
        if let Some(mtx) = &self.inner {
            f(mtx.lock().deref_mut());
        }
    }

    /// Record that a unit was published with `hints` non-empty hints totalling `entries` entries.
    pub(crate) fn unit_ok(&self, hints: usize, entries: usize) {
        self.update_with(|inner| {
            inner.units_ok += 1;
            inner.hints += u64::try_from(hints).unwrap_or(u64::MAX);
            inner.chill_entries += u64::try_from(entries).unwrap_or(u64::MAX);
        });
    }

    /// Increment the "a unit has been rejected" count.
    pub(crate) fn unit_err(&self) {
        self.update_with(|inner| inner.units_err += 1);
    }

    /// Change the [TimingState] the current thread is in.
    pub(crate) fn timing_state(&self, new_state: TimingState) {
        self.update_with(|inner| {
            let now = Instant::now();
            let (prev_state, then) = THREAD_STATE.replace((new_state, now));
            let d = now.saturating_duration_since(then);
            inner.durations[prev_state as usize] =
                inner.durations[prev_state as usize].saturating_add(d);
        });
    }

    /// Output these statistics to the appropriate output path.
    pub(crate) fn output(&self) {
        self.update_with(|inner| inner.output());
    }
}

impl StatsInner {
    fn new(output_path: String) -> Self {
        Self {
            output_path,
            units_ok: 0,
            units_err: 0,
            hints: 0,
            chill_entries: 0,
            durations: [Duration::new(0, 0); TimingState::COUNT],
        }
    }

    fn output(&self) {
        let json = self.to_json();
        if self.output_path == "-" {
            eprintln!("{json}");
        } else {
            fs::write(&self.output_path, json).ok();
        }
    }

    /// Turn these statistics into JSON, with fields sorted by name so that the output can be
    /// matched textually.
    fn to_json(&self) -> String {
        fn fmt_duration(d: Duration) -> String {
            format!("{}.{:03}", d.as_secs(), d.subsec_millis())
        }

        let mut fields = vec![
            ("units_ok".to_owned(), self.units_ok.to_string()),
            ("units_err".to_owned(), self.units_err.to_string()),
            ("hints".to_owned(), self.hints.to_string()),
            ("chill_entries".to_owned(), self.chill_entries.to_string()),
        ];
        for v in TimingState::iter() {
            let s = v.to_string();
            if !s.is_empty() {
                fields.push((s, fmt_duration(self.durations[v as usize])));
            }
        }
        fields.sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        format!(
            r#"{{
    {}
}}"#,
            fields
                .iter()
                .map(|(x, y)| format!(r#""{x}": {y}"#))
                .collect::<Vec<_>>()
                .join(",\n    ")
        )
    }
}

/// The stages a thread goes through while publishing a unit.
#[repr(u8)]
#[derive(Copy, Clone, Display, EnumCount, EnumIter)]
// New states must not be assigned explicit discriminants: the variants index `durations`. A state
// whose `to_string` is empty is not output.
pub(crate) enum TimingState {
    /// Not publishing anything. Time spent here is not displayed.
    #[strum(to_string = "")]
    None,
    /// Checking that a unit is well formed.
    #[strum(to_string = "duration_validating")]
    Validating,
    /// Computing next-use distances.
    #[strum(to_string = "duration_scanning")]
    Scanning,
    /// Turning next-use distances into hints.
    #[strum(to_string = "duration_emitting")]
    Emitting,
}

thread_local! {
    static THREAD_STATE: Cell<(TimingState, Instant)> = Cell::new((TimingState::None, Instant::now()));
}
