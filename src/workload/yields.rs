use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const YIELDS_PER_OP: u32 = 64;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 8,
        name: "yield",
        class: Class::SCHEDULER.union(Class::OS),
        verify: VerifyMode::None,
        short_opt: None,
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_yield,
        help: "start N workers hammering sched_yield",
    }
}

fn stress_yield(args: &mut WorkloadArgs) -> ExitCode {
    args.ci.counter_ready = true;
    while args.keep_going() {
        for _ in 0..YIELDS_PER_OP {
            unsafe { libc::sched_yield() };
        }
        args.bump();
    }
    args.ci.run_ok = true;
    ExitCode::Success
}
