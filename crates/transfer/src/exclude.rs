//! Exclude rule transport.
//!
//! Rules are carried as opaque strings: `int32 len, bytes` each, ended by
//! `int32 0`. Nothing here interprets them.

use std::io::{Read, Write};

use logging::trace_flist;
use protocol::{MAX_LINE_LEN, ProtocolError, StreamChannel};

/// Writes `rules` followed by the terminator.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn send_exclude_list<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    rules: &[String],
) -> Result<(), ProtocolError> {
    for rule in rules.iter().filter(|rule| !rule.is_empty()) {
        channel.write_int(rule.len() as i32)?;
        channel.write_str(rule)?;
    }
    channel.write_int(0)
}

/// Reads rules until the terminator.
#[allow(clippy::cast_sign_loss)]
pub fn recv_exclude_list<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
) -> Result<Vec<String>, ProtocolError> {
    let mut rules = Vec::new();
    loop {
        let len = channel.read_int()?;
        if len == 0 {
            break;
        }
        if len < 0 || len as usize > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
        }
        let rule = channel.read_bytes(len as usize)?;
        rules.push(String::from_utf8_lossy(&rule).into_owned());
    }
    trace_flist!("received {} exclude rules", rules.len());
    Ok(rules)
}
