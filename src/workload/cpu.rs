use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const CHUNK: u64 = 16384;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 1,
        name: "cpu",
        class: Class::CPU,
        verify: VerifyMode::Optional,
        short_opt: Some('c'),
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_cpu,
        help: "start N workers exercising floating point compute",
    }
}

fn chunk_sum(base: u64) -> f64 {
    let mut sum = 0.0f64;
    for i in 0..CHUNK {
        sum += ((base + i) as f64).sqrt();
    }
    sum
}

/// One bogo-op is one [`CHUNK`] of square roots. With verification on,
/// every chunk is computed twice; a divergence means the FPU or the
/// compiler is lying to us and the worker reports failure.
fn stress_cpu(args: &mut WorkloadArgs) -> ExitCode {
    args.ci.counter_ready = true;
    while args.keep_going() {
        let sum = chunk_sum(args.ci.counter);
        if args.verify {
            let again = chunk_sum(args.ci.counter);
            if sum.to_bits() != again.to_bits() {
                return ExitCode::NotSuccess;
            }
        }
        std::hint::black_box(sum);
        args.bump();
    }
    let ops = args.ci.counter as f64 * CHUNK as f64;
    args.add_metric("million sqrt operations", ops / 1e6);
    args.ci.run_ok = true;
    ExitCode::Success
}
