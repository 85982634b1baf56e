use super::WorkloadArgs;
use crate::ffi::syscall;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 9,
        name: "fork",
        class: Class::SCHEDULER
            .union(Class::OS)
            .union(Class::PATHOLOGICAL),
        verify: VerifyMode::None,
        short_opt: Some('f'),
        hooks: Hooks::default(),
        opt_setters: &[],
        workload: stress_fork,
        help: "start N workers churning fork and exit (pathological)",
    }
}

/// Fork/exit churn. Pathological: a fleet of these can exhaust the PID
/// space and starve unrelated processes, so the class gate keeps it
/// behind `--pathological`. Each grandchild exits immediately; one
/// bogo-op per reaped grandchild.
fn stress_fork(args: &mut WorkloadArgs) -> ExitCode {
    args.ci.counter_ready = true;
    while args.keep_going() {
        match syscall::fork() {
            Ok(0) => unsafe { libc::_exit(0) },
            Ok(pid) => {
                loop {
                    match syscall::waitpid(pid, 0) {
                        Ok(_) => break,
                        Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                        Err(_) => break,
                    }
                }
                args.bump();
            }
            // Fork pressure is the point; back off briefly and retry.
            Err(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
        }
    }
    args.ci.run_ok = true;
    ExitCode::Success
}
