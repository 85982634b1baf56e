//! End-of-run reporting: console metrics and the YAML artifact.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::ffi::syscall;
use crate::metrics::EntryReport;

#[cfg(test)]
mod test;

const AUX_KEY_MAX: usize = 40;

#[derive(Serialize)]
struct RunInfo {
    hostname: String,
    sysname: String,
    release: String,
    machine: String,
    date: String,
    seed: u64,
}

#[derive(Serialize)]
struct MetricsBlock {
    stressor: &'static str,
    #[serde(rename = "bogo-ops")]
    bogo_ops: u64,
    #[serde(rename = "bogo-ops-per-second-usr-sys-time")]
    ops_per_sec_cpu: f64,
    #[serde(rename = "bogo-ops-per-second-real-time")]
    ops_per_sec_real: f64,
    #[serde(rename = "wall-clock-time")]
    wall_clock_time: f64,
    #[serde(rename = "user-time")]
    user_time: f64,
    #[serde(rename = "system-time")]
    system_time: f64,
    #[serde(rename = "cpu-usage-per-instance")]
    cpu_usage_per_instance: f64,
    #[serde(rename = "max-rss")]
    max_rss: i64,
    #[serde(flatten)]
    aux: BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct Times {
    #[serde(rename = "run-time")]
    run_time: f64,
    #[serde(rename = "user-time")]
    user_time: f64,
    #[serde(rename = "system-time")]
    system_time: f64,
    #[serde(rename = "load-average-1m")]
    load_1m: f64,
    #[serde(rename = "load-average-5m")]
    load_5m: f64,
    #[serde(rename = "load-average-15m")]
    load_15m: f64,
}

#[derive(Serialize)]
struct YamlReport {
    runinfo: RunInfo,
    metrics: Vec<MetricsBlock>,
    times: Times,
}

/// Auxiliary metric description to YAML key: lowercased, spaces to
/// dashes, everything else non-alphanumeric stripped, capped at 40
/// characters.
pub fn aux_key(desc: &str) -> String {
    let mut key = String::new();
    for ch in desc.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch == ' ' {
            key.push('-');
        } else if ch.is_ascii_alphanumeric() || ch == '-' {
            key.push(ch);
        }
        if key.len() == AUX_KEY_MAX {
            break;
        }
    }
    key
}

fn uname_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn run_info(seed: u64) -> RunInfo {
    let mut uts = unsafe { std::mem::zeroed::<libc::utsname>() };
    let have_uts = unsafe { libc::uname(&mut uts) } == 0;

    // YYYY-MM-DD HH:MM:SS local time, formatted by libc to stay in
    // this crate's stack.
    let mut date = [0 as libc::c_char; 32];
    let now = unsafe { libc::time(std::ptr::null_mut()) };
    let mut tm = unsafe { std::mem::zeroed::<libc::tm>() };
    let date = unsafe {
        libc::localtime_r(&now, &mut tm);
        let fmt = c"%Y-%m-%d %H:%M:%S";
        let len = libc::strftime(date.as_mut_ptr(), date.len(), fmt.as_ptr(), &tm);
        uname_field(&date[..len.max(1)])
    };

    RunInfo {
        hostname: if have_uts {
            uname_field(&uts.nodename)
        } else {
            String::new()
        },
        sysname: if have_uts {
            uname_field(&uts.sysname)
        } else {
            String::new()
        },
        release: if have_uts {
            uname_field(&uts.release)
        } else {
            String::new()
        },
        machine: if have_uts {
            uname_field(&uts.machine)
        } else {
            String::new()
        },
        date,
        seed,
    }
}

/// Emits the YAML report: `runinfo`, one `metrics` block per entry,
/// and the overall `times` block.
pub fn emit_yaml(
    path: &Path,
    seed: u64,
    reports: &[EntryReport],
    run_time: f64,
    user_time: f64,
    system_time: f64,
) -> Result<()> {
    let loadavg = syscall::getloadavg().unwrap_or([0.0; 3]);
    let doc = YamlReport {
        runinfo: run_info(seed),
        metrics: reports
            .iter()
            .map(|r| MetricsBlock {
                stressor: r.name,
                bogo_ops: r.bogo_ops,
                ops_per_sec_cpu: r.ops_per_sec_cpu,
                ops_per_sec_real: r.ops_per_sec_real,
                wall_clock_time: r.wall_secs,
                user_time: r.user_secs,
                system_time: r.system_secs,
                cpu_usage_per_instance: r.cpu_usage_pct,
                max_rss: r.maxrss_kb,
                aux: r
                    .aux
                    .iter()
                    .map(|(desc, value)| (aux_key(desc), *value))
                    .collect(),
            })
            .collect(),
        times: Times {
            run_time,
            user_time,
            system_time,
            load_1m: loadavg[0],
            load_5m: loadavg[1],
            load_15m: loadavg[2],
        },
    };

    let mut file = File::create(path)?;
    serde_yaml::to_writer(&mut file, &doc).map_err(std::io::Error::other)?;
    file.flush()?;
    Ok(())
}

/// Console metrics table; the brief form drops the auxiliary metrics.
pub fn log_metrics(reports: &[EntryReport], brief: bool) {
    info!(
        "{:<10} {:>12} {:>9} {:>9} {:>9} {:>14} {:>14}",
        "stressor", "bogo-ops", "real(s)", "usr(s)", "sys(s)", "ops/s (real)", "ops/s (cpu)"
    );
    for r in reports {
        info!(
            "{:<10} {:>12} {:>9.2} {:>9.2} {:>9.2} {:>14.2} {:>14.2}",
            r.name,
            r.bogo_ops,
            r.wall_secs,
            r.user_secs,
            r.system_secs,
            r.ops_per_sec_real,
            r.ops_per_sec_cpu
        );
    }
    if brief {
        return;
    }
    for r in reports {
        for (desc, value) in &r.aux {
            info!("{:<10} {:>14.2} {} (geometric mean)", r.name, value, desc);
        }
        if r.interrupts > 0 {
            info!("{:<10} {:>14} interrupts serviced", r.name, r.interrupts);
        }
        if r.max_temp_milli > 0 {
            info!(
                "{:<10} {:>14.1} C hottest thermal zone",
                r.name,
                r.max_temp_milli as f64 / 1000.0
            );
        }
    }
}

pub fn log_times(run_time: f64, user_time: f64, system_time: f64) {
    if let Ok(avg) = syscall::getloadavg() {
        info!(
            "load average: {:.2} {:.2} {:.2}",
            avg[0], avg[1], avg[2]
        );
    }
    info!(
        "run completed in {:.2}s (user {:.2}s, system {:.2}s)",
        run_time, user_time, system_time
    );
}
