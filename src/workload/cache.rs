use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const FALLBACK_BUF: usize = 2 * 1024 * 1024;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 2,
        name: "cache",
        class: Class::CPU_CACHE.union(Class::CPU),
        verify: VerifyMode::Optional,
        short_opt: None,
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_cache,
        help: "start N workers thrashing the CPU cache with strided walks",
    }
}

/// Walks a buffer sized past the detected last-level cache at page-ish
/// strides so most accesses miss. One bogo-op is one full walk.
fn stress_cache(args: &mut WorkloadArgs) -> ExitCode {
    let size = match args.mem_cache.size {
        0 => FALLBACK_BUF,
        cache => (cache as usize * 2).max(FALLBACK_BUF / 4),
    };
    let mut buf = vec![0u8; size];
    let stride = 64 + args.page_size;

    args.ci.counter_ready = true;
    while args.keep_going() {
        let round = args.ci.counter as u8;
        let mut idx = 0usize;
        while idx < size {
            buf[idx] = buf[idx].wrapping_add(round);
            idx += stride;
        }
        if args.verify {
            // Each walked cell was bumped exactly counter+1 times by a
            // known sequence of rounds; spot-check the first cell.
            let expect = expected_cell(args.ci.counter);
            if buf[0] != expect {
                return ExitCode::NotSuccess;
            }
        }
        args.bump();
    }
    args.ci.run_ok = true;
    ExitCode::Success
}

fn expected_cell(rounds_done: u64) -> u8 {
    // Sum of 0..=rounds_done mod 256.
    let n = rounds_done % 512;
    (0..=n).fold(0u8, |acc, r| acc.wrapping_add(r as u8))
}
