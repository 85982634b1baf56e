/// Process exit codes shared by the harness and its workers.
///
/// Workers report their outcome through `_exit`; the parent decodes the
/// same values out of `waitpid` status words. The harness itself exits
/// with the most severe code observed across the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// A bug in the harness, not in a workload.
    Failure = 1,
    /// A workload ran and failed.
    NotSuccess = 2,
    /// A workload could not get the resources it needed.
    NoResource = 3,
    /// A workload is not implemented on this system.
    NotImplemented = 4,
    Signaled = 5,
    /// A worker left through `exit()` instead of returning its status.
    BySysExit = 6,
    MetricsUntrustworthy = 7,
}

impl ExitCode {
    /// Any unknown value is treated as a harness failure.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::NotSuccess,
            3 => Self::NoResource,
            4 => Self::NotImplemented,
            5 => Self::Signaled,
            6 => Self::BySysExit,
            7 => Self::MetricsUntrustworthy,
            _ => Self::Failure,
        }
    }

    // Severity ordering: METRICS < NO_RESOURCE < NOT_SUCCESS < others.
    fn severity(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::MetricsUntrustworthy => 1,
            Self::NoResource => 2,
            Self::NotSuccess => 3,
            Self::Failure | Self::NotImplemented | Self::Signaled | Self::BySysExit => 4,
        }
    }

    /// Keeps the more severe of the two, first observed wins ties.
    pub fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod test {
    use super::ExitCode;

    #[test]
    fn merge_prefers_severity() {
        let code = ExitCode::Success
            .merge(ExitCode::MetricsUntrustworthy)
            .merge(ExitCode::NoResource)
            .merge(ExitCode::NotSuccess);
        assert_eq!(code, ExitCode::NotSuccess);
        assert_eq!(code.merge(ExitCode::Signaled), ExitCode::Signaled);
        // First observed wins among equally severe outcomes.
        assert_eq!(
            ExitCode::Signaled.merge(ExitCode::BySysExit),
            ExitCode::Signaled
        );
    }

    #[test]
    fn raw_round_trip() {
        for code in [0, 2, 3, 4, 5, 6, 7] {
            assert_eq!(ExitCode::from_raw(code) as i32, code);
        }
        assert_eq!(ExitCode::from_raw(42), ExitCode::Failure);
    }
}
