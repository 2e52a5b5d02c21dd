//! Host resource limits used to size external tool parallelism.

use std::fs;
use std::path::Path;

const CGROUP_V2_CPU_MAX: &str = "/sys/fs/cgroup/cpu.max";
const CGROUP_V1_QUOTA: &str = "/sys/fs/cgroup/cpu/cpu.cfs_quota_us";
const CGROUP_V1_PERIOD: &str = "/sys/fs/cgroup/cpu/cpu.cfs_period_us";

/// CPU count granted by the container's CFS quota, if one is set.
///
/// `None` means "no explicit limit"; callers let the tool pick.
pub fn cpu_quota_threads() -> Option<u32> {
    cpu_quota_from(Path::new("/"))
}

/// Same as [`cpu_quota_threads`] but with cgroup files read under `root`.
pub fn cpu_quota_from(root: &Path) -> Option<u32> {
    let rel = |p: &str| root.join(p.trim_start_matches('/'));

    if let Ok(raw) = fs::read_to_string(rel(CGROUP_V2_CPU_MAX)) {
        return parse_cpu_max(&raw);
    }

    let quota = fs::read_to_string(rel(CGROUP_V1_QUOTA)).ok()?;
    let period = fs::read_to_string(rel(CGROUP_V1_PERIOD)).ok()?;
    threads_from(quota.trim().parse().ok()?, period.trim().parse().ok()?)
}

fn parse_cpu_max(raw: &str) -> Option<u32> {
    let mut parts = raw.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    threads_from(quota.parse().ok()?, period.parse().ok()?)
}

fn threads_from(quota: i64, period: i64) -> Option<u32> {
    let quota = u64::try_from(quota).ok().filter(|q| *q > 0)?;
    let period = u64::try_from(period).ok().filter(|p| *p > 0)?;
    u32::try_from(quota.div_ceil(period).max(1)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel.trim_start_matches('/'));
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    #[test]
    fn cgroup_v2_limit() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), CGROUP_V2_CPU_MAX, "250000 100000\n");
        assert_eq!(cpu_quota_from(tmp.path()), Some(3));
    }

    #[test]
    fn cgroup_v2_unlimited() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), CGROUP_V2_CPU_MAX, "max 100000\n");
        assert_eq!(cpu_quota_from(tmp.path()), None);
    }

    #[test]
    fn cgroup_v1_limit_and_unlimited() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), CGROUP_V1_QUOTA, "200000\n");
        write(tmp.path(), CGROUP_V1_PERIOD, "100000\n");
        assert_eq!(cpu_quota_from(tmp.path()), Some(2));

        write(tmp.path(), CGROUP_V1_QUOTA, "-1\n");
        assert_eq!(cpu_quota_from(tmp.path()), None);
    }

    #[test]
    fn fractional_quota_rounds_up_to_one() {
        assert_eq!(threads_from(50_000, 100_000), Some(1));
    }

    #[test]
    fn extreme_quota_values_do_not_overflow() {
        assert_eq!(threads_from(i64::MAX, i64::MAX), Some(1));
        assert_eq!(threads_from(i64::MAX, 1), None);
        assert_eq!(parse_cpu_max("9223372036854775807 100000"), None);
        assert_eq!(threads_from(-1, 100_000), None);
        assert_eq!(threads_from(100_000, 0), None);
    }

    #[test]
    fn no_cgroup_files_means_no_limit() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(cpu_quota_from(tmp.path()), None);
    }
}
