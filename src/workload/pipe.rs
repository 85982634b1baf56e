use super::WorkloadArgs;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const MSG_LEN: usize = 512;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 5,
        name: "pipe",
        class: Class::PIPE_IO.union(Class::OS).union(Class::SCHEDULER),
        verify: VerifyMode::Optional,
        short_opt: Some('p'),
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_pipe,
        help: "start N workers pumping data through a self-pipe",
    }
}

/// Self-pipe round trips: write a tagged message, read it back on the
/// other end. One bogo-op per round trip.
fn stress_pipe(args: &mut WorkloadArgs) -> ExitCode {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return ExitCode::NoResource;
    }
    let (rd, wr) = (fds[0], fds[1]);

    let mut out = [0u8; MSG_LEN];
    let mut inp = [0u8; MSG_LEN];

    args.ci.counter_ready = true;
    let status = loop {
        if !args.keep_going() {
            break ExitCode::Success;
        }
        out[0] = args.ci.counter as u8;
        out[MSG_LEN - 1] = (args.ci.counter >> 8) as u8;

        let wrote = unsafe { libc::write(wr, out.as_ptr() as _, MSG_LEN) };
        if wrote != MSG_LEN as isize {
            // EINTR during shutdown is expected, not a failure.
            if !args.keep_going() {
                break ExitCode::Success;
            }
            break ExitCode::Failure;
        }
        let mut got = 0usize;
        while got < MSG_LEN {
            let n = unsafe { libc::read(rd, inp[got..].as_mut_ptr() as _, MSG_LEN - got) };
            if n <= 0 {
                break;
            }
            got += n as usize;
        }
        if got < MSG_LEN {
            if !args.keep_going() {
                break ExitCode::Success;
            }
            break ExitCode::Failure;
        }
        if args.verify && (inp[0] != out[0] || inp[MSG_LEN - 1] != out[MSG_LEN - 1]) {
            break ExitCode::NotSuccess;
        }
        args.bump();
    };

    unsafe {
        libc::close(rd);
        libc::close(wr);
    }
    if status == ExitCode::Success {
        args.ci.run_ok = true;
    }
    status
}
