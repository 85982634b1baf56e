//! Metrics aggregation and the post-run integrity check.

use log::{error, info, warn};

use crate::plan::{RunList, StatusKind, STATUS_KINDS};
use crate::shared::SharedPlane;

#[cfg(test)]
mod test;

/// Counters are considered suspicious when nothing ticked for this
/// long; short runs legitimately end with zero ops.
const SUSPICIOUS_IDLE_SECS: f64 = 30.0;

/// Aggregated measurements for one run-list entry.
#[derive(Clone, Debug)]
pub struct EntryReport {
    pub name: &'static str,
    pub instances: u32,
    pub bogo_ops: u64,
    /// Arithmetic mean wall-clock time per instance.
    pub wall_secs: f64,
    pub user_secs: f64,
    pub system_secs: f64,
    pub ops_per_sec_real: f64,
    pub ops_per_sec_cpu: f64,
    pub cpu_usage_pct: f64,
    pub maxrss_kb: i64,
    /// System-wide interrupts observed across this entry's workers.
    pub interrupts: u64,
    /// Hottest thermal zone any worker saw, milli-degrees C.
    pub max_temp_milli: i32,
    /// Auxiliary metrics, geometric-meaned across instances.
    pub aux: Vec<(String, f64)>,
}

/// Rolls the per-instance stats slots up into one report per entry
/// that completed at least one instance. Call only after every child
/// has been reaped.
pub fn aggregate(plan: &RunList, shared: &SharedPlane) -> Vec<EntryReport> {
    let mut reports = Vec::new();
    for entry in &plan.entries {
        if !entry.runnable() || entry.completed == 0 {
            continue;
        }

        let mut bogo_ops = 0u64;
        let mut wall_sum = 0f64;
        let mut user = 0f64;
        let mut system = 0f64;
        let mut maxrss_kb = 0i64;
        let mut interrupts = 0u64;
        let mut max_temp_milli = 0i32;
        let mut aux_values: Vec<(String, Vec<f64>)> = Vec::new();

        for slot_idx in entry.stats_range.clone() {
            // All children are reaped, the parent is the only reader.
            let slot = unsafe { shared.slot(slot_idx) };
            bogo_ops += slot.counter_total;
            wall_sum += slot.duration_total;
            user += slot.utime_total;
            system += slot.stime_total;
            maxrss_kb = maxrss_kb.max(slot.maxrss_kb);
            interrupts += slot.interrupts;
            max_temp_milli = max_temp_milli.max(slot.max_temp_milli);
            for metric in slot.metrics.iter().filter(|m| m.is_set()) {
                let desc = metric.description().to_string();
                match aux_values.iter_mut().find(|(d, _)| *d == desc) {
                    Some((_, vals)) => vals.push(metric.value),
                    None => aux_values.push((desc, vec![metric.value])),
                }
            }
        }

        let completed = entry.completed as f64;
        let wall_secs = wall_sum / completed;
        let cpu = user + system;
        reports.push(EntryReport {
            name: entry.name,
            instances: entry.completed,
            bogo_ops,
            wall_secs,
            user_secs: user,
            system_secs: system,
            ops_per_sec_real: rate(bogo_ops, wall_secs),
            ops_per_sec_cpu: rate(bogo_ops, cpu),
            cpu_usage_pct: if wall_secs > 0.0 {
                100.0 * cpu / wall_secs / completed
            } else {
                0.0
            },
            maxrss_kb,
            interrupts,
            max_temp_milli,
            aux: aux_values
                .into_iter()
                .map(|(desc, vals)| (desc, geometric_mean(&vals)))
                .collect(),
        });
    }
    reports
}

fn rate(ops: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        ops as f64 / secs
    } else {
        0.0
    }
}

/// Independently rehashes every completed stats slot and compares
/// against the worker-written checksum record. Returns false (and logs
/// each offender) on any mismatch; a mismatch means something scribbled
/// over the stats area after the worker finalised it.
pub fn verify_integrity(plan: &mut RunList, shared: &SharedPlane) -> bool {
    let mut ok = true;
    for entry in &mut plan.entries {
        if !entry.runnable() {
            continue;
        }
        for slot_idx in entry.stats_range.clone() {
            let slot = unsafe { shared.slot(slot_idx) };
            if !slot.completed {
                continue;
            }
            let checksum = unsafe { shared.checksum(slot_idx) };
            if !checksum.verify(&slot.ci) {
                error!(
                    "{}: stats slot {} fails its integrity check \
                     (counter {}, run_ok {})",
                    entry.name, slot_idx, slot.ci.counter, slot.ci.run_ok
                );
                entry.bump_status(StatusKind::BadMetrics);
                ok = false;
            } else if slot.ci.counter > 0 && !slot.ci.counter_ready {
                warn!(
                    "{}: stats slot {} counted {} ops without marking them ready",
                    entry.name, slot_idx, slot.ci.counter
                );
                entry.bump_status(StatusKind::BadMetrics);
                ok = false;
            }
        }
    }
    ok
}

/// Warns (non-fatal) when the whole run produced zero bogo-ops despite
/// measurable run time: the counters, not the workloads, are suspect.
pub fn counters_suspicious(plan: &RunList, shared: &SharedPlane) -> bool {
    let mut any_completed = false;
    let mut min_duration = f64::INFINITY;
    for entry in &plan.entries {
        if !entry.runnable() {
            continue;
        }
        for slot_idx in entry.stats_range.clone() {
            let slot = unsafe { shared.slot(slot_idx) };
            if !slot.completed {
                continue;
            }
            any_completed = true;
            if slot.counter_total > 0 {
                return false;
            }
            min_duration = min_duration.min(slot.duration_total);
        }
    }
    if any_completed && min_duration > SUSPICIOUS_IDLE_SECS {
        warn!(
            "no bogo-ops counted in {:.0} s of run time, counters are suspicious",
            min_duration
        );
        return true;
    }
    false
}

/// The categorized exit-status summary, one line per status kind.
pub fn summarize_statuses(plan: &RunList) {
    for kind in STATUS_KINDS {
        let label = match kind {
            StatusKind::Passed => "passed",
            StatusKind::Skipped => "skipped",
            StatusKind::Failed => "failed",
            StatusKind::BadMetrics => "metrics untrustworthy",
        };
        let mut parts = Vec::new();
        let mut total = 0u32;
        for entry in &plan.entries {
            let count = entry.status_count(kind);
            if count > 0 {
                parts.push(format!("{} ({})", entry.name, count));
                total += count;
            }
        }
        if parts.is_empty() {
            info!("{}: 0", label);
        } else {
            info!("{}: {}: {}", label, total, parts.join(", "));
        }
    }
}

/// `frexp`: decomposes into `(mantissa, exponent)` with the mantissa in
/// `[0.5, 1)`.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    if raw_exp == 0 {
        // Subnormal: renormalise through a 2^64 scale first.
        let (mantissa, exp) = frexp(x * 2f64.powi(64));
        return (mantissa, exp - 64);
    }
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, raw_exp - 1022)
}

/// Geometric mean over decomposed mantissas and exponents, so products
/// of many large (or tiny) samples neither overflow nor flush to zero.
/// Non-positive samples make the mean 0.
pub fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut mantissa = 1.0f64;
    let mut exponent = 0i64;
    for &value in values {
        if value <= 0.0 || !value.is_finite() {
            return 0.0;
        }
        let (m, e) = frexp(value);
        mantissa *= m;
        exponent += e as i64;
        let (m, e) = frexp(mantissa);
        mantissa = m;
        exponent += e as i64;
    }
    let inv_n = 1.0 / values.len() as f64;
    mantissa.powf(inv_n) * (exponent as f64 * inv_n).exp2()
}
