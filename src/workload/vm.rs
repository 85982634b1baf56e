use std::ptr::null_mut;

use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const PAGES_PER_ROUND: usize = 64;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 4,
        name: "vm",
        class: Class::VM.union(Class::MEMORY).union(Class::OS),
        verify: VerifyMode::Optional,
        short_opt: Some('m'),
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_vm,
        help: "start N workers mapping, touching and unmapping memory",
    }
}

/// One bogo-op is one map/touch/unmap cycle. Also pokes the read-only
/// sentinel pages each round; the values there are always zero and a
/// nonzero read means the shared plane was trampled.
fn stress_vm(args: &mut WorkloadArgs) -> ExitCode {
    let len = PAGES_PER_ROUND * args.page_size;

    args.ci.counter_ready = true;
    while args.keep_going() {
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return ExitCode::NoResource;
        }

        let fill = args.ci.counter as u8;
        let pages = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len) };
        for page in pages.chunks_mut(args.page_size) {
            page[0] = fill;
            page[args.page_size / 2] = fill.wrapping_add(1);
        }
        if args.verify {
            for page in pages.chunks(args.page_size) {
                if page[0] != fill || page[args.page_size / 2] != fill.wrapping_add(1) {
                    unsafe { libc::munmap(ptr, len) };
                    return ExitCode::NotSuccess;
                }
            }
        }
        unsafe { libc::munmap(ptr, len) };

        // The "wo" page is readable despite its name; both sentinel
        // probes must observe zeroes.
        let ro = unsafe { std::ptr::read_volatile(args.sentinels.ro) };
        let wo = unsafe { std::ptr::read_volatile(args.sentinels.wo) };
        if ro != 0 || wo != 0 {
            return ExitCode::NotSuccess;
        }

        args.bump();
    }
    let touched = args.ci.counter as f64 * len as f64;
    args.add_metric("megabytes mapped", touched / (1024.0 * 1024.0));
    args.ci.run_ok = true;
    ExitCode::Success
}
