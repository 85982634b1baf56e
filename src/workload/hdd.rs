use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use super::WorkloadArgs;
use crate::ffi;
use crate::registry::{Class, Descriptor, Hooks, OptSetter, VerifyMode};
use crate::status::ExitCode;

const BLOCK: usize = 64 * 1024;
const BLOCKS_DEFAULT: u64 = 16;
const BLOCKS_MAX: u64 = 4096;

/// Blocks written per cycle; tunable through `--set hdd-blocks=N`.
/// Set before the fleet forks, so every worker inherits the value.
static BLOCKS_PER_FILE: AtomicU64 = AtomicU64::new(BLOCKS_DEFAULT);

fn set_blocks(arg: &str) -> Result<(), &'static str> {
    match arg.parse::<u64>() {
        Ok(n) if (1..=BLOCKS_MAX).contains(&n) => {
            BLOCKS_PER_FILE.store(n, Ordering::Relaxed);
            Ok(())
        }
        _ => Err("hdd-blocks takes a count between 1 and 4096"),
    }
}

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 6,
        name: "hdd",
        class: Class::FILESYSTEM.union(Class::IO).union(Class::OS),
        verify: VerifyMode::Optional,
        short_opt: Some('d'),
        hooks: Hooks::default(),
        opt_setters: &[OptSetter {
            opt: "hdd-blocks",
            set: set_blocks,
        }],
        workload: stress_hdd,
        help: "start N workers writing, syncing and reading back files",
    }
}

fn write_cycle(file: &mut File, round: u64, verify: bool) -> std::io::Result<bool> {
    let blocks = BLOCKS_PER_FILE.load(Ordering::Relaxed);
    let mut block = vec![0u8; BLOCK];
    for seq in 0..blocks {
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = (i as u64 ^ round ^ seq) as u8;
        }
        file.write_all(&block)?;
    }
    // fsync, not fdatasync: metadata traffic is part of the workload.
    unsafe { libc::fsync(file.as_raw_fd()) };

    if verify {
        file.seek(SeekFrom::Start(0))?;
        let mut back = vec![0u8; BLOCK];
        for seq in 0..blocks {
            file.read_exact(&mut back)?;
            let sample = (round ^ seq) as u8;
            if back[0] != sample {
                return Ok(false);
            }
        }
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(true)
}

/// One bogo-op per write/sync/read cycle over a scratch file in the
/// configured temp dir. The file is removed at the end of the run
/// unless file keeping is on.
fn stress_hdd(args: &mut WorkloadArgs) -> ExitCode {
    let path = args
        .temp_dir
        .join(format!("brunt-hdd-{}-{}", args.pid, args.instance));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path);
    let mut file = match file {
        Ok(file) => file,
        Err(_) => return ExitCode::NoResource,
    };

    let start = ffi::now();
    args.ci.counter_ready = true;
    let mut status = ExitCode::Success;
    while args.keep_going() {
        match write_cycle(&mut file, args.ci.counter, args.verify) {
            Ok(true) => args.bump(),
            Ok(false) => {
                status = ExitCode::NotSuccess;
                break;
            }
            Err(_) => {
                status = ExitCode::NoResource;
                break;
            }
        }
    }

    let elapsed = ffi::now() - start;
    if elapsed > 0.0 {
        let blocks = BLOCKS_PER_FILE.load(Ordering::Relaxed);
        let bytes = args.ci.counter as f64 * (BLOCK as u64 * blocks) as f64;
        args.add_metric(
            "megabytes written per second",
            bytes / (1024.0 * 1024.0) / elapsed,
        );
    }
    if !args.keep_files {
        let _ = std::fs::remove_file(&path);
    }
    if status == ExitCode::Success {
        args.ci.run_ok = true;
    }
    status
}
