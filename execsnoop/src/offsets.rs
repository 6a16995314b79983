//! `task_struct` layout discovery for the probes.
//!
//! The BPF programs carry no kernel headers; the member offsets they chase
//! are resolved here from kernel BTF and written into the load-time config.

use anyhow::{Context, Result, bail};
use btf_rs::{Btf, Type};
use execsnoop_common::TaskOffsets;
use log::{info, warn};

use crate::settings::OffsetSettings;

pub const DEFAULT_BTF_PATH: &str = "/sys/kernel/btf/vmlinux";

fn member_offset(btf: &Btf, ty: &Type, name: &str) -> Result<Option<u32>> {
    let members = match ty {
        Type::Struct(s) => &s.members,
        Type::Union(u) => &u.members,
        _ => return Ok(None),
    };

    for member in members {
        let member_name = btf.resolve_name(member)?;
        if member_name == name {
            return Ok(Some(member.bit_offset() / 8));
        }
        // Anonymous struct/union: look inside, offsets add up.
        if member_name.is_empty() {
            let inner = btf.resolve_chained_type(member)?;
            if let Some(offset) = member_offset(btf, &inner, name)? {
                return Ok(Some(member.bit_offset() / 8 + offset));
            }
        }
    }
    Ok(None)
}

/// Byte offset of `member` in `struct name`.
pub fn struct_member_offset(btf: &Btf, name: &str, member: &str) -> Result<u32> {
    let types = btf
        .resolve_types_by_name(name)
        .with_context(|| format!("Failed to find struct {} in BTF", name))?;
    for ty in types.iter() {
        if let Some(offset) = member_offset(btf, ty, member)? {
            return Ok(offset);
        }
    }
    bail!("{}.{} not found in BTF", name, member)
}

pub fn from_btf(btf: &Btf) -> Result<TaskOffsets> {
    Ok(TaskOffsets {
        real_parent: struct_member_offset(btf, "task_struct", "real_parent")?,
        tgid: struct_member_offset(btf, "task_struct", "tgid")?,
        comm: struct_member_offset(btf, "task_struct", "comm")?,
        signal: struct_member_offset(btf, "task_struct", "signal")?,
        signal_tty: struct_member_offset(btf, "signal_struct", "tty")?,
        tty_name: struct_member_offset(btf, "tty_struct", "name")?,
    })
}

pub fn from_btf_file(path: &str) -> Result<TaskOffsets> {
    let btf =
        Btf::from_file(path).with_context(|| format!("Failed to parse BTF from {}", path))?;
    from_btf(&btf)
}

/// Offsets to hand to the probes, or `None` when they cannot be trusted.
///
/// Explicitly configured offsets override the BTF ones member by member.
pub fn resolve(settings: &OffsetSettings) -> Option<TaskOffsets> {
    let path = settings.btf_path.as_deref().unwrap_or(DEFAULT_BTF_PATH);
    match from_btf_file(path) {
        Ok(offsets) => {
            let offsets = settings.overlay(offsets);
            info!("task_struct offsets: {:?}", offsets);
            Some(offsets)
        }
        Err(e) => match settings.explicit() {
            Some(offsets) => {
                info!("BTF unavailable ({:#}), using configured offsets", e);
                Some(offsets)
            }
            None => {
                warn!(
                    "Kernel struct offsets unavailable: {:#}. \
                     Parent pid, tty and ancestor detection are disabled",
                    e
                );
                None
            }
        },
    }
}
