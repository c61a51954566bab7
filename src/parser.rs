//! Parsers for the controller's mapping response.
//!
//! A response is a sequence of lines, each `key<SEP>host1,host2,...`, ended by a blank line or
//! by the controller closing the connection.
use nom::{
    bytes::{complete::take_till1, streaming::take_till},
    character::{complete::char as complete_char, streaming::char as streaming_char},
    combinator::{all_consuming, opt},
    multi::separated_list1,
    sequence::{separated_pair, terminated},
    IResult,
};

use crate::error::Error;

/// One parsed controller record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideRecord {
    /// Key the record applies to.
    pub key: String,
    /// Candidate hosts, in controller order.
    pub hosts: Vec<String>,
}

/// Layout of a record line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordFormat {
    /// Separator between the key and its host list.
    pub field_separator: char,
    /// Truncate `host:port` entries to `host`.
    pub strip_ports: bool,
}

impl Default for RecordFormat {
    fn default() -> Self {
        RecordFormat {
            field_separator: ':',
            strip_ports: false,
        }
    }
}

fn line_with(terminator: u8) -> impl Fn(&[u8]) -> IResult<&[u8], &[u8]> {
    move |buf| terminated(take_till(|c| c == terminator), streaming_char(terminator as char))(buf)
}

/// Splits the next line off `buf`.
///
/// Returns the number of bytes consumed (terminator included) and the line with any trailing
/// `\r` removed, or `None` if `buf` does not yet hold a full line.
pub fn parse_line(buf: &[u8], terminator: u8) -> Option<(usize, &[u8])> {
    match line_with(terminator)(buf) {
        Ok((remaining, line)) => {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Some((buf.len() - remaining.len(), line))
        }
        Err(_) => None,
    }
}

fn record_fields(sep: u8) -> impl Fn(&[u8]) -> IResult<&[u8], (&[u8], Vec<&[u8]>)> {
    move |line| {
        all_consuming(separated_pair(
            take_till1(|c| c == sep),
            complete_char(sep as char),
            terminated(
                separated_list1(complete_char(','), take_till1(|c| c == b',')),
                opt(complete_char(',')),
            ),
        ))(line)
    }
}

/// Parses one non-blank record line.
pub fn parse_record(line: &[u8], format: RecordFormat) -> Result<OverrideRecord, Error> {
    let malformed = || {
        Error::Protocol(format!(
            "malformed controller record `{}`",
            String::from_utf8_lossy(line)
        ))
    };

    let (_, (key, hosts)) = record_fields(format.field_separator as u8)(line)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| malformed())?;

    let key = std::str::from_utf8(key).map_err(|_| malformed())?.trim();
    if key.is_empty() {
        return Err(malformed());
    }

    let hosts = hosts
        .into_iter()
        .map(|h| {
            let host = std::str::from_utf8(h).map_err(|_| malformed())?.trim();
            let host = match host.split_once(':') {
                Some((h, _)) if format.strip_ports => h,
                _ => host,
            };
            if host.is_empty() {
                return Err(malformed());
            }
            Ok(host.to_string())
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(OverrideRecord {
        key: key.to_string(),
        hosts,
    })
}
