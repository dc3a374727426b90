//! Node resource snapshots.
//!
//! A [`Stats`] value is a point-in-time reading of `/proc/meminfo`,
//! `/proc/stat`, `/proc/loadavg`, and the root filesystem. Workers collect
//! one every stats tick and serve it on `GET /metrics`; the manager feeds it
//! into node accounting and the load-aware scheduler. Snapshots are purely
//! observational and never mutated by the orchestrator.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Memory counters from `/proc/meminfo`, in kilobytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemInfo {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
}

/// Root-filesystem usage in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

/// Load averages from `/proc/loadavg`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// A point-in-time resource snapshot of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub memory: MemInfo,
    pub disk: DiskInfo,
    pub cpu: CpuStat,
    pub load: LoadAvg,
}

impl Stats {
    /// Collect a fresh snapshot from the local machine.
    ///
    /// Individual readings that fail are left zeroed and logged; a snapshot
    /// is always produced.
    pub fn collect() -> Stats {
        Stats {
            memory: read_meminfo(),
            disk: read_root_disk(),
            cpu: read_cpu_stat(),
            load: read_loadavg(),
        }
    }

    pub fn mem_total_kb(&self) -> u64 {
        self.memory.mem_total_kb
    }

    pub fn mem_available_kb(&self) -> u64 {
        self.memory.mem_available_kb
    }

    /// Memory in use, in kilobytes.
    pub fn mem_used_kb(&self) -> u64 {
        self.memory
            .mem_total_kb
            .saturating_sub(self.memory.mem_available_kb)
    }

    pub fn disk_total(&self) -> u64 {
        self.disk.total
    }

    pub fn disk_used(&self) -> u64 {
        self.disk.used
    }

    /// Fraction of CPU time spent non-idle since boot, in `[0, 1]`.
    pub fn cpu_usage(&self) -> f64 {
        let idle = self.cpu.idle + self.cpu.iowait;
        let active = self.cpu.user
            + self.cpu.nice
            + self.cpu.system
            + self.cpu.irq
            + self.cpu.softirq
            + self.cpu.steal;
        let total = idle + active;
        if total == 0 {
            return 0.0;
        }
        (total - idle) as f64 / total as f64
    }
}

fn read_meminfo() -> MemInfo {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(contents) => parse_meminfo(&contents),
        Err(err) => {
            warn!(error = %err, "failed to read /proc/meminfo");
            MemInfo::default()
        }
    }
}

fn read_cpu_stat() -> CpuStat {
    match std::fs::read_to_string("/proc/stat") {
        Ok(contents) => parse_cpu_stat(&contents),
        Err(err) => {
            warn!(error = %err, "failed to read /proc/stat");
            CpuStat::default()
        }
    }
}

fn read_loadavg() -> LoadAvg {
    match std::fs::read_to_string("/proc/loadavg") {
        Ok(contents) => parse_loadavg(&contents),
        Err(err) => {
            warn!(error = %err, "failed to read /proc/loadavg");
            LoadAvg::default()
        }
    }
}

#[cfg(unix)]
fn read_root_disk() -> DiskInfo {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let root = CString::new("/").expect("static path");
    let mut vfs = MaybeUninit::<libc::statvfs>::uninit();
    // statvfs is the portable way to size the root filesystem; /proc has no
    // equivalent.
    let rc = unsafe { libc::statvfs(root.as_ptr(), vfs.as_mut_ptr()) };
    if rc != 0 {
        warn!("statvfs on / failed");
        return DiskInfo::default();
    }
    let vfs = unsafe { vfs.assume_init() };

    let block = vfs.f_frsize as u64;
    let total = vfs.f_blocks as u64 * block;
    let free = vfs.f_bfree as u64 * block;
    DiskInfo {
        total,
        free,
        used: total.saturating_sub(free),
    }
}

#[cfg(not(unix))]
fn read_root_disk() -> DiskInfo {
    DiskInfo::default()
}

fn parse_meminfo(contents: &str) -> MemInfo {
    let mut info = MemInfo::default();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(label), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match label {
            "MemTotal:" => info.mem_total_kb = value,
            "MemAvailable:" => info.mem_available_kb = value,
            _ => {}
        }
    }
    info
}

fn parse_cpu_stat(contents: &str) -> CpuStat {
    // The aggregate line is "cpu  user nice system idle iowait irq softirq
    // steal ..."; per-core lines are "cpu0", "cpu1", ...
    let Some(line) = contents
        .lines()
        .find(|l| l.starts_with("cpu ") || l.starts_with("cpu\t"))
    else {
        return CpuStat::default();
    };

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().unwrap_or(0))
        .collect();

    let at = |i: usize| fields.get(i).copied().unwrap_or(0);
    CpuStat {
        user: at(0),
        nice: at(1),
        system: at(2),
        idle: at(3),
        iowait: at(4),
        irq: at(5),
        softirq: at(6),
        steal: at(7),
    }
}

fn parse_loadavg(contents: &str) -> LoadAvg {
    let mut parts = contents.split_whitespace();
    let mut next = || -> f64 {
        parts
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    };
    LoadAvg {
        one: next(),
        five: next(),
        fifteen: next(),
    }
}
