//! The implementation of the `YKCHILL_LOG` and `YKCHILL_LOG_IR` environment variables.

use std::{
    collections::HashSet,
    env,
    error::Error,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::LazyLock,
};
use strum::{EnumCount, FromRepr};

pub(crate) mod stats;

/// How verbose should normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors (e.g. a unit being rejected).
    Error,
    /// Log warnings (e.g. being asked to publish an empty batch of units).
    Warning,
    /// Log the publication of each unit.
    UnitEvent,
    /// Log every non-empty hint as it is published.
    HintEvent,
}

#[derive(Debug)]
pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. `None` means stderr.
    path: Option<PathBuf>,
}

impl Log {
    pub(crate) fn new() -> Result<Self, Box<dyn Error>> {
        Self::from_var(env::var("YKCHILL_LOG").ok())
    }

    /// Create a log from the value `var` of `YKCHILL_LOG`, if it was set.
    pub(crate) fn from_var(var: Option<String>) -> Result<Self, Box<dyn Error>> {
        let s = match var {
            Some(s) => s,
            None => {
                return Ok(Self {
                    path: None,
                    level: Verbosity::Error,
                })
            }
        };
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // Truncate any previous log so that we only append to this run's output.
                    File::create(&path).ok();
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => return Err("YKCHILL_LOG must be of the format `[<path|->:]<level>`".into()),
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid YKCHILL_LOG level '{s}': {e}"))?;
        let max_level = Verbosity::COUNT - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("YKCHILL_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self { path, level })
    }

    /// Will messages at `level` be output?
    pub(crate) fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Disabled && level <= self.level
    }

    /// Log `msg` with the [Verbosity] level `level`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "ykchill-error",
                Verbosity::Warning => "ykchill-warning",
                Verbosity::UnitEvent => "ykchill-unit-event",
                Verbosity::HintEvent => "ykchill-hint-event",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}

/// The stages of the pipeline whose output `YKCHILL_LOG_IR` can show.
#[derive(Debug, Eq, Hash, PartialEq)]
pub(crate) enum IRPhase {
    /// The unit as received.
    Unit,
    /// The next-use distances of every group after every instruction.
    NextUse,
    /// The emitted chill hints.
    Hints,
}

impl IRPhase {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "unit" => Ok(Self::Unit),
            "next_use" => Ok(Self::NextUse),
            "hints" => Ok(Self::Hints),
            _ => Err(format!("Invalid YKCHILL_LOG_IR value: {s}").into()),
        }
    }
}

/// Parse a `YKCHILL_LOG_IR` value into an output path (`-` for stderr) and a set of phases.
fn parse_log_ir(x: &str) -> Result<(String, HashSet<IRPhase>), Box<dyn Error>> {
    let (path, phases) = match x.split(':').collect::<Vec<_>>().as_slice() {
        [path, phases] => (*path, *phases),
        [phases] => ("-", *phases),
        _ => {
            return Err(
                "YKCHILL_LOG_IR must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'".into(),
            )
        }
    };
    let mut log_phases = HashSet::new();
    for x in phases.split(',') {
        log_phases.insert(IRPhase::from_str(x)?);
    }
    Ok((path.to_string(), log_phases))
}

static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
    let x = env::var("YKCHILL_LOG_IR").ok()?;
    let (path, phases) = parse_log_ir(&x).unwrap_or_else(|e| panic!("{e}"));
    if path != "-" {
        // Truncate any previous log so that we only append to this run's output.
        File::create(&path).ok();
    }
    Some((path, phases))
});

pub(crate) fn should_log_ir(phase: IRPhase) -> bool {
    if let Some(true) = LOG_IR.as_ref().map(|(_, phases)| phases.contains(&phase)) {
        return true;
    }
    false
}

pub(crate) fn log_ir(s: &str) {
    match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
        Some("-") => eprint!("{s}"),
        Some(x) => {
            File::options()
                .append(true)
                .open(x)
                .map(|mut x| x.write(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
