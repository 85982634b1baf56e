use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong before or outside the worker fleet.
/// Per-worker failures are not errors at this level, they surface as
/// exit statuses and are classified during aggregation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown stressor {name:?}, valid names are: {valid}")]
    UnknownStressor { name: String, valid: String },

    #[error("unknown class {name:?}, valid classes are: {valid}")]
    UnknownClass { name: String, valid: String },

    #[error("--{0} cannot be combined with --{1}")]
    ConflictingModes(&'static str, &'static str),

    #[error("--class requires --all, --sequential, --permute or --random")]
    ClassWithoutMode,

    #[error("--random cannot be combined with explicitly selected stressors")]
    RandomWithExplicit,

    #[error("no stressors left to run")]
    EmptyPlan,

    #[error("invalid {what}: {detail}")]
    InvalidArgument { what: &'static str, detail: String },

    #[error("failed to map shared {what}")]
    Map {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to install handler for signal {sig}")]
    Sigaction {
        sig: i32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
