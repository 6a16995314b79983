#![cfg_attr(not(test), no_std)]

pub mod probe;

/// Width of one captured argument, terminator included.
pub const ARGSIZE: usize = 128;
/// Width of the controlling terminal name.
pub const TTYSIZE: usize = 64;
/// Kernel `TASK_COMM_LEN`.
pub const TASK_COMM_LEN: usize = 16;
/// Longest command name the kernel stores, NUL excluded.
pub const MAX_ANCESTOR_NAME_LEN: usize = TASK_COMM_LEN - 1;
/// Upper bound of ARGUMENT records emitted for one exec, ellipsis included.
pub const MAX_ARGS: usize = 20;
/// Upper bound of the ancestor walk (levels inspected = `MAX_ANCESTORS - 1`).
pub const MAX_ANCESTORS: usize = 20;

/// Argument sent in place of the remaining argv when it does not fit.
pub const ELLIPSIS: &[u8; 4] = b"...\0";

pub const DEFAULT_ANCESTOR_NAME: &str = "sshd";

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Argument = 0,
    Return = 1,
}

impl TryFrom<u32> for EventType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Argument),
            1 => Ok(EventType::Return),
            other => Err(other),
        }
    }
}

/// Fixed-layout record pushed through the perf event array.
///
/// Entry emits one record per argument (`event_type == Argument`), exit emits
/// a single summary (`event_type == Return`). Only the summary carries
/// `ancestor`, `tty`, `uid`, `gid` and `ret_val`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecEvent {
    pub pid: u32,
    pub ppid: u32,
    pub ancestor: i32,
    pub comm: [u8; TASK_COMM_LEN],
    pub event_type: u32,
    pub argv: [u8; ARGSIZE],
    pub tty: [u8; TTYSIZE],
    pub uid: u32,
    pub gid: u32,
    pub ret_val: i32,
}

impl ExecEvent {
    pub const fn zeroed() -> Self {
        Self {
            pid: 0,
            ppid: 0,
            ancestor: 0,
            comm: [0; TASK_COMM_LEN],
            event_type: EventType::Argument as u32,
            argv: [0; ARGSIZE],
            tty: [0; TTYSIZE],
            uid: 0,
            gid: 0,
            ret_val: 0,
        }
    }

    pub fn kind(&self) -> Result<EventType, u32> {
        EventType::try_from(self.event_type)
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AncestorMatch {
    /// Compare only `len(target)` bytes: `sshd-session` matches `sshd`.
    Prefix = 0,
    /// The ancestor name must end right after the target bytes.
    Exact = 1,
}

/// Byte offsets of the kernel structure members the probes dereference.
///
/// Resolved by the loader (BTF or settings); meaningless unless
/// [`ProbeConfig::offsets_valid`] is set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskOffsets {
    /// `task_struct.real_parent`
    pub real_parent: u32,
    /// `task_struct.tgid`
    pub tgid: u32,
    /// `task_struct.comm`
    pub comm: u32,
    /// `task_struct.signal`
    pub signal: u32,
    /// `signal_struct.tty`
    pub signal_tty: u32,
    /// `tty_struct.name`
    pub tty_name: u32,
}

/// Load-time constants written into the BPF object before it is loaded.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    pub offsets: TaskOffsets,
    pub offsets_valid: u32,
    pub ancestor_match: u32,
    pub ancestor_name: [u8; TASK_COMM_LEN],
    pub ancestor_name_len: u32,
    pub max_args: u32,
    pub max_ancestors: u32,
}

impl ProbeConfig {
    pub const fn new() -> Self {
        Self {
            offsets: TaskOffsets {
                real_parent: 0,
                tgid: 0,
                comm: 0,
                signal: 0,
                signal_tty: 0,
                tty_name: 0,
            },
            offsets_valid: 0,
            ancestor_match: AncestorMatch::Prefix as u32,
            ancestor_name: [0; TASK_COMM_LEN],
            ancestor_name_len: 0,
            max_args: MAX_ARGS as u32,
            max_ancestors: MAX_ANCESTORS as u32,
        }
    }

    /// Sets the designated ancestor. Names are cut to `TASK_COMM_LEN - 1`
    /// bytes, the most the kernel keeps in front of the terminating NUL.
    pub fn with_ancestor(mut self, name: &[u8], mode: AncestorMatch) -> Self {
        let len = if name.len() > MAX_ANCESTOR_NAME_LEN {
            MAX_ANCESTOR_NAME_LEN
        } else {
            name.len()
        };
        self.ancestor_name = [0; TASK_COMM_LEN];
        self.ancestor_name[..len].copy_from_slice(&name[..len]);
        self.ancestor_name_len = len as u32;
        self.ancestor_match = mode as u32;
        self
    }

    pub fn with_offsets(mut self, offsets: TaskOffsets) -> Self {
        self.offsets = offsets;
        self.offsets_valid = 1;
        self
    }

    pub fn has_offsets(&self) -> bool {
        self.offsets_valid != 0
    }

    /// Number of ARGUMENT records one exec may produce, in `2..=MAX_ARGS`.
    #[inline(always)]
    pub fn arg_limit(&self) -> usize {
        let limit = self.max_args as usize;
        if limit < 2 {
            2
        } else if limit > MAX_ARGS {
            MAX_ARGS
        } else {
            limit
        }
    }

    /// Number of ancestor levels to inspect, in `0..MAX_ANCESTORS`.
    #[inline(always)]
    pub fn ancestor_levels(&self) -> usize {
        let depth = self.max_ancestors as usize;
        if depth == 0 {
            0
        } else if depth > MAX_ANCESTORS {
            MAX_ANCESTORS - 1
        } else {
            depth - 1
        }
    }

    /// Compares a command name against the designated ancestor.
    #[inline(always)]
    pub fn ancestor_matches(&self, comm: &[u8; TASK_COMM_LEN]) -> bool {
        let len = self.ancestor_name_len as usize;
        if len == 0 || len > MAX_ANCESTOR_NAME_LEN {
            return false;
        }
        for i in 0..TASK_COMM_LEN {
            if i >= len {
                break;
            }
            if comm[i] != self.ancestor_name[i] {
                return false;
            }
        }
        if self.ancestor_match == AncestorMatch::Exact as u32 {
            return comm[len] == 0;
        }
        true
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::new().with_ancestor(DEFAULT_ANCESTOR_NAME.as_bytes(), AncestorMatch::Prefix)
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ExecEvent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProbeConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn comm(name: &str) -> [u8; TASK_COMM_LEN] {
        let mut out = [0u8; TASK_COMM_LEN];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out
    }

    #[test]
    fn test_record_layout_is_stable() {
        assert_eq!(core::mem::size_of::<ExecEvent>(), 236);
        assert_eq!(core::mem::align_of::<ExecEvent>(), 4);
        assert_eq!(core::mem::size_of::<ProbeConfig>(), 60);
    }

    #[test]
    fn test_event_type_discriminants() {
        assert_eq!(EventType::try_from(0), Ok(EventType::Argument));
        assert_eq!(EventType::try_from(1), Ok(EventType::Return));
        assert_eq!(EventType::try_from(7), Err(7));
    }

    #[test]
    fn test_prefix_match_accepts_longer_names() {
        let config = ProbeConfig::new().with_ancestor(b"sshd", AncestorMatch::Prefix);
        assert!(config.ancestor_matches(&comm("sshd")));
        assert!(config.ancestor_matches(&comm("sshd-session")));
        assert!(!config.ancestor_matches(&comm("ssh")));
        assert!(!config.ancestor_matches(&comm("bash")));
    }

    #[test]
    fn test_exact_match_rejects_longer_names() {
        let config = ProbeConfig::new().with_ancestor(b"sshd", AncestorMatch::Exact);
        assert!(config.ancestor_matches(&comm("sshd")));
        assert!(!config.ancestor_matches(&comm("sshd-session")));
        assert!(!config.ancestor_matches(&comm("ssh")));
    }

    #[test]
    fn test_empty_target_never_matches() {
        let config = ProbeConfig::new().with_ancestor(b"", AncestorMatch::Prefix);
        assert!(!config.ancestor_matches(&comm("")));
        assert!(!config.ancestor_matches(&comm("init")));
    }

    #[test]
    fn test_long_target_matches_kernel_comm() {
        // The kernel keeps "systemd-journald" as "systemd-journal\0".
        let kernel_comm = comm("systemd-journal");
        for mode in [AncestorMatch::Prefix, AncestorMatch::Exact] {
            let config = ProbeConfig::new().with_ancestor(b"systemd-journald", mode);
            assert_eq!(config.ancestor_name_len as usize, MAX_ANCESTOR_NAME_LEN);
            assert_eq!(config.ancestor_name[MAX_ANCESTOR_NAME_LEN], 0);
            assert!(config.ancestor_matches(&kernel_comm), "mode {:?}", mode);
            assert!(!config.ancestor_matches(&comm("systemd-journ")), "mode {:?}", mode);
        }
    }

    #[test]
    fn test_oversized_name_len_never_matches() {
        let mut config = ProbeConfig::new().with_ancestor(b"abc", AncestorMatch::Prefix);
        config.ancestor_name_len = TASK_COMM_LEN as u32;
        assert!(!config.ancestor_matches(&comm("abc")));
    }

    #[test]
    fn test_limits_are_clamped() {
        let mut config = ProbeConfig::new();
        config.max_args = 0;
        assert_eq!(config.arg_limit(), 2);
        config.max_args = 500;
        assert_eq!(config.arg_limit(), MAX_ARGS);
        config.max_args = 5;
        assert_eq!(config.arg_limit(), 5);

        config.max_ancestors = 0;
        assert_eq!(config.ancestor_levels(), 0);
        config.max_ancestors = 500;
        assert_eq!(config.ancestor_levels(), MAX_ANCESTORS - 1);
        config.max_ancestors = 3;
        assert_eq!(config.ancestor_levels(), 2);
    }

    #[test]
    fn test_default_targets_sshd() {
        let config = ProbeConfig::default();
        assert_eq!(&config.ancestor_name[..4], b"sshd");
        assert_eq!(config.ancestor_name_len, 4);
        assert!(!config.has_offsets());
    }
}
