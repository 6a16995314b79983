//! Hook logic shared by the BPF programs and the host tests.
//!
//! Everything here is generic over three small traits so that the same code
//! runs against aya-ebpf helpers in the kernel and against an in-memory fake
//! in unit tests. Loops are bounded by the compile-time constants; the
//! load-time limits in [`ProbeConfig`] can only lower those bounds.

use crate::{
    ARGSIZE, ELLIPSIS, EventType, ExecEvent, MAX_ANCESTORS, MAX_ARGS, ProbeConfig, TASK_COMM_LEN,
    TTYSIZE,
};

/// Reads of kernel task state. Every pointer chase may fail.
pub trait TaskAccess {
    type Task: Copy;

    /// tgid of the current task.
    fn current_pid(&self) -> u32;
    fn current_task(&self) -> Option<Self::Task>;
    fn current_comm(&self) -> [u8; TASK_COMM_LEN];
    fn current_uid_gid(&self) -> (u32, u32);

    fn real_parent(&self, task: Self::Task) -> Option<Self::Task>;
    fn tgid(&self, task: Self::Task) -> Option<u32>;
    fn comm(&self, task: Self::Task) -> Option<[u8; TASK_COMM_LEN]>;
    /// Copies `task->signal->tty->name` into `buf`, NUL terminated.
    fn tty_name(&self, task: Self::Task, buf: &mut [u8]) -> Option<usize>;
}

/// Reads of the traced process' memory.
pub trait UserMemory {
    fn read_ptr(&self, addr: u64) -> Option<u64>;
    /// Copies at most `buf.len() - 1` bytes plus a NUL. Returns the number of
    /// bytes copied, terminator excluded.
    fn read_str(&self, addr: u64, buf: &mut [u8]) -> Option<usize>;
}

pub trait EventSink {
    fn submit(&self, event: &ExecEvent);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryOutcome {
    pub records: usize,
    pub truncated: bool,
}

#[inline(always)]
fn parent_tgid<K: TaskAccess>(kernel: &K) -> u32 {
    kernel
        .current_task()
        .and_then(|task| kernel.real_parent(task))
        .and_then(|parent| kernel.tgid(parent))
        .unwrap_or(0)
}

/// Emits one ARGUMENT record per captured argument.
///
/// The first record carries the executable path instead of `argv[0]`. When
/// the vector is longer than the limit, the last record carries `...`.
#[inline(always)]
pub fn trace_exec_entry<K, U, S>(
    kernel: &K,
    user: &U,
    sink: &S,
    config: &ProbeConfig,
    filename: u64,
    argv: u64,
) -> EntryOutcome
where
    K: TaskAccess,
    U: UserMemory,
    S: EventSink,
{
    let mut event = ExecEvent::zeroed();
    event.pid = kernel.current_pid();
    event.ppid = parent_tgid(kernel);
    event.comm = kernel.current_comm();
    event.event_type = EventType::Argument as u32;

    if user.read_str(filename, &mut event.argv).is_none() {
        event.argv = [0; ARGSIZE];
    }
    sink.submit(&event);

    let mut outcome = EntryOutcome {
        records: 1,
        truncated: false,
    };
    if argv == 0 {
        return outcome;
    }

    let limit = config.arg_limit();
    for slot in 1..MAX_ARGS {
        if slot >= limit {
            break;
        }
        let addr = argv.wrapping_add((slot * core::mem::size_of::<u64>()) as u64);
        let ptr = match user.read_ptr(addr) {
            Some(ptr) if ptr != 0 => ptr,
            _ => return outcome,
        };

        event.argv = [0; ARGSIZE];
        if slot == limit - 1 {
            event.argv[..ELLIPSIS.len()].copy_from_slice(ELLIPSIS);
            sink.submit(&event);
            outcome.records += 1;
            outcome.truncated = true;
            return outcome;
        }

        if user.read_str(ptr, &mut event.argv).is_none() {
            event.argv = [0; ARGSIZE];
        }
        sink.submit(&event);
        outcome.records += 1;
    }

    outcome
}

/// Walks `real_parent` links from the immediate parent looking for the
/// configured ancestor name.
#[inline(always)]
pub fn find_ancestor<K: TaskAccess>(kernel: &K, config: &ProbeConfig) -> bool {
    if config.ancestor_name_len == 0 {
        return false;
    }
    let levels = config.ancestor_levels();
    let mut task = match kernel.current_task().and_then(|task| kernel.real_parent(task)) {
        Some(parent) => parent,
        None => return false,
    };

    for level in 0..MAX_ANCESTORS - 1 {
        if level >= levels {
            break;
        }
        if let Some(comm) = kernel.comm(task) {
            if config.ancestor_matches(&comm) {
                return true;
            }
        }
        task = match kernel.real_parent(task) {
            Some(parent) => parent,
            None => return false,
        };
    }

    false
}

/// Emits the RETURN record for a completed exec. Returns the ancestor verdict.
#[inline(always)]
pub fn trace_exec_return<K, S>(kernel: &K, sink: &S, config: &ProbeConfig, ret: i64) -> bool
where
    K: TaskAccess,
    S: EventSink,
{
    let mut event = ExecEvent::zeroed();
    event.pid = kernel.current_pid();
    event.ppid = parent_tgid(kernel);
    event.event_type = EventType::Return as u32;

    let ancestor = find_ancestor(kernel, config);
    event.ancestor = ancestor as i32;

    let tty = kernel
        .current_task()
        .and_then(|task| kernel.tty_name(task, &mut event.tty));
    if tty.is_none() {
        event.tty = [0; TTYSIZE];
    }

    let (uid, gid) = kernel.current_uid_gid();
    event.uid = uid;
    event.gid = gid;
    event.comm = kernel.current_comm();
    event.ret_val = ret as i32;

    sink.submit(&event);
    ancestor
}
