//! Decoding of raw perf records into listener events.

use anyhow::{Result, bail};
use execsnoop_common::{EventType, ExecEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub pid: u32,
    pub argv: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Return {
    pub pid: u32,
    pub ppid: u32,
    pub ancestor: bool,
    pub comm: String,
    pub tty: String,
    pub uid: u32,
    pub gid: u32,
    pub ret_val: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Arg(Arg),
    Return(Return),
}

impl Event {
    pub fn pid(&self) -> u32 {
        match self {
            Event::Arg(arg) => arg.pid,
            Event::Return(ret) => ret.pid,
        }
    }
}

/// Converts a fixed, NUL padded kernel buffer into an owned string.
pub fn parse_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl TryFrom<&ExecEvent> for Event {
    type Error = anyhow::Error;

    fn try_from(raw: &ExecEvent) -> Result<Self> {
        match raw.kind() {
            Ok(EventType::Argument) => Ok(Event::Arg(Arg {
                pid: raw.pid,
                argv: parse_string(&raw.argv),
            })),
            Ok(EventType::Return) => Ok(Event::Return(Return {
                pid: raw.pid,
                ppid: raw.ppid,
                ancestor: raw.ancestor != 0,
                comm: parse_string(&raw.comm),
                tty: parse_string(&raw.tty),
                uid: raw.uid,
                gid: raw.gid,
                ret_val: raw.ret_val,
            })),
            Err(other) => bail!("unknown event type {} from pid {}", other, raw.pid),
        }
    }
}

/// Decodes one perf sample. Samples may be padded past the record size.
pub fn decode(bytes: &[u8]) -> Result<Event> {
    if bytes.len() < std::mem::size_of::<ExecEvent>() {
        bail!(
            "short event: {} bytes, expected {}",
            bytes.len(),
            std::mem::size_of::<ExecEvent>()
        );
    }
    let raw = unsafe { (bytes.as_ptr() as *const ExecEvent).read_unaligned() };
    Event::try_from(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use execsnoop_common::{ARGSIZE, TTYSIZE};

    fn as_bytes(event: &ExecEvent) -> Vec<u8> {
        let ptr = event as *const ExecEvent as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<ExecEvent>()) }.to_vec()
    }

    fn fill<const N: usize>(text: &str) -> [u8; N] {
        let mut out = [0u8; N];
        out[..text.len()].copy_from_slice(text.as_bytes());
        out
    }

    #[test]
    fn test_parse_string_stops_at_nul() {
        assert_eq!(parse_string(b"pts/1\0garbage"), "pts/1");
        assert_eq!(parse_string(b"\0\0\0"), "");
        assert_eq!(parse_string(b"full"), "full");
    }

    #[test]
    fn test_parse_string_is_lossy() {
        assert_eq!(parse_string(b"a\xffb\0"), "a\u{fffd}b");
    }

    #[test]
    fn test_decode_argument() {
        let mut raw = ExecEvent::zeroed();
        raw.pid = 77;
        raw.argv = fill::<ARGSIZE>("-la");

        let event = decode(&as_bytes(&raw)).unwrap();
        assert_eq!(
            event,
            Event::Arg(Arg {
                pid: 77,
                argv: "-la".to_string()
            })
        );
        assert_eq!(event.pid(), 77);
    }

    #[test]
    fn test_decode_return() {
        let mut raw = ExecEvent::zeroed();
        raw.pid = 77;
        raw.ppid = 70;
        raw.ancestor = 1;
        raw.comm = fill::<16>("ls");
        raw.event_type = EventType::Return as u32;
        raw.tty = fill::<TTYSIZE>("pts/0");
        raw.uid = 1000;
        raw.gid = 1000;
        raw.ret_val = -2;

        let Event::Return(ret) = decode(&as_bytes(&raw)).unwrap() else {
            panic!("expected a return event");
        };
        assert_eq!(ret.ppid, 70);
        assert!(ret.ancestor);
        assert_eq!(ret.comm, "ls");
        assert_eq!(ret.tty, "pts/0");
        assert_eq!(ret.ret_val, -2);
    }

    #[test]
    fn test_decode_tolerates_trailing_padding() {
        let mut bytes = as_bytes(&ExecEvent::zeroed());
        bytes.extend_from_slice(&[0u8; 4]);
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        let bytes = as_bytes(&ExecEvent::zeroed());
        assert!(decode(&bytes[..10]).is_err());

        let mut raw = ExecEvent::zeroed();
        raw.event_type = 9;
        let err = decode(&as_bytes(&raw)).unwrap_err();
        assert!(err.to_string().contains("unknown event type 9"));
    }
}
