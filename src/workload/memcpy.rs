use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const BUF_LEN: usize = 256 * 1024;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 3,
        name: "memcpy",
        class: Class::MEMORY.union(Class::CPU_CACHE),
        verify: VerifyMode::Always,
        short_opt: None,
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_memcpy,
        help: "start N workers copying and checking memory",
    }
}

/// Copies a patterned source buffer and checks the copy byte-for-byte
/// every round. Verification is unconditional: a copy that does not
/// compare equal is memory corruption, never an expected outcome.
fn stress_memcpy(args: &mut WorkloadArgs) -> ExitCode {
    let mut src = vec![0u8; BUF_LEN];
    let mut dst = vec![0u8; BUF_LEN];

    args.ci.counter_ready = true;
    while args.keep_going() {
        let seed = args.ci.counter as u8;
        for (i, byte) in src.iter_mut().enumerate() {
            *byte = (i as u8) ^ seed;
        }
        dst.copy_from_slice(&src);
        if dst != src {
            return ExitCode::NotSuccess;
        }
        args.bump();
    }
    let copied = args.ci.counter as f64 * BUF_LEN as f64;
    args.add_metric("megabytes copied", copied / (1024.0 * 1024.0));
    args.ci.run_ok = true;
    ExitCode::Success
}
