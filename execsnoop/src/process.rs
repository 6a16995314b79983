use procfs::process::Process;

/// Parent pid from `/proc/<pid>/stat`, for records the kernel left at 0.
pub fn parent_pid(pid: u32) -> Option<u32> {
    let pid = i32::try_from(pid).ok()?;
    let stat = Process::new(pid).ok()?.stat().ok()?;
    u32::try_from(stat.ppid).ok().filter(|&ppid| ppid != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of_self() {
        let expected = std::os::unix::process::parent_id();
        assert_eq!(parent_pid(std::process::id()), Some(expected));
    }

    #[test]
    fn test_unknown_pid() {
        assert_eq!(parent_pid(u32::MAX), None);
        assert_eq!(parent_pid(0), None);
    }
}
