/// Common tracepoint header for syscall events (sys_enter_*, sys_exit_*)
#[repr(C)]
#[allow(dead_code)]
pub struct SyscallTraceHeader {
    pub common_type: u16,
    pub common_flags: u8,
    pub common_preempt_count: u8,
    pub common_pid: i32,
    pub __syscall_nr: i32,
    pub _pad: i32,
}

// ============================================================
// sys_enter_execve
// ============================================================

#[repr(C)]
#[allow(dead_code)]
pub struct SysEnterExecve {
    pub header: SyscallTraceHeader,
    pub filename: u64,
    pub argv: u64,
    pub envp: u64,
}

// ============================================================
// sys_enter_execveat
// ============================================================

#[repr(C)]
#[allow(dead_code)]
pub struct SysEnterExecveat {
    pub header: SyscallTraceHeader,
    pub fd: i64,
    pub filename: u64,
    pub argv: u64,
    pub envp: u64,
    pub flags: i64,
}

// ============================================================
// sys_exit_execve / sys_exit_execveat
// ============================================================

#[repr(C)]
#[allow(dead_code)]
pub struct SysExitExecve {
    pub header: SyscallTraceHeader,
    pub ret: i64,
}
