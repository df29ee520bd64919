use nom::branch::alt;
use nom::bytes::streaming::{tag, take, take_until};
use nom::character::complete::{digit1, space0};
use nom::combinator::{map, map_res, value};
use nom::number::complete::be_u16;
use nom::sequence::{preceded, terminated, tuple};
use nom::Err::Incomplete;
use nom::IResult;

use crate::ascii::{ACK, NAK};

type Buf = [u8];

/// Banner preceding the payload of text commands.
pub(crate) const OK_BANNER: &[u8] = b"\n\rOK\n\r";
/// Line terminator used by the console, also its wakeup reply.
pub(crate) const EOL: &[u8] = b"\n\r";

#[derive(PartialEq, Copy, Clone, Debug)]
pub(crate) enum ResponseToken<'a> {
    /// Complete response, with ACK and banners stripped.
    Payload(&'a Buf),
    Nak,
    NeedData,
    InvalidDataReceived,
}

/// The console's reply to a wakeup line, possibly preceded by line noise.
pub(crate) fn parse_wakeup(buf: &Buf) -> ResponseToken<'_> {
    parse_response(map(
        preceded(take_until(EOL), tag(EOL)),
        |_| ResponseToken::Payload(&[]),
    )(buf))
}

/// ACK followed by exactly `size` bytes, or a NAK.
pub(crate) fn parse_ack_payload(buf: &Buf, size: usize) -> ResponseToken<'_> {
    parse_response(alt((
        value(ResponseToken::Nak, ascii_char(NAK)),
        map(preceded(ascii_char(ACK), take(size)), ResponseToken::Payload),
    ))(buf))
}

/// `\n\rOK\n\r`, followed by a `\n\r` terminated line if `eol` is set.
pub(crate) fn parse_ok_response(buf: &Buf, eol: bool) -> ResponseToken<'_> {
    let result = if eol {
        preceded(ok_banner, eol_line)(buf)
    } else {
        ok_banner(buf).map(|(rest, _)| (rest, &rest[..0]))
    };
    parse_response(result.map(|(rest, payload)| (rest, ResponseToken::Payload(payload))))
}

fn parse_response<'a>(result: IResult<&'a Buf, ResponseToken<'a>>) -> ResponseToken<'a> {
    match result {
        Ok((_buf, token)) => token,
        Err(Incomplete(_)) => ResponseToken::NeedData,
        Err(_) => ResponseToken::InvalidDataReceived,
    }
}

fn ok_banner(buf: &Buf) -> IResult<&Buf, &Buf> {
    tag(OK_BANNER)(buf)
}

fn eol_line(buf: &Buf) -> IResult<&Buf, &Buf> {
    terminated(take_until(EOL), tag(EOL))(buf)
}

/// Page count and first-page record offset from a verified dump header.
pub(crate) fn dump_header(buf: &Buf) -> Option<(u16, u16)> {
    let parsed: IResult<&Buf, (u16, u16)> = tuple((be_u16, be_u16))(buf);
    parsed.ok().map(|(_rest, header)| header)
}

/// Whitespace separated decimal counters, as in the RXCHECK reply.
pub(crate) fn counters<const N: usize>(line: &Buf) -> Option<[u32; N]> {
    let mut out = [0u32; N];
    let mut rest = line;
    for slot in out.iter_mut() {
        let (r, n) = counter(rest).ok()?;
        *slot = n;
        rest = r;
    }
    Some(out)
}

fn counter(buf: &Buf) -> IResult<&Buf, u32> {
    preceded(space0, map_int(digit1))(buf)
}

fn ascii_char<'a>(ascii_char: u8) -> impl Fn(&'a Buf) -> IResult<&'a Buf, char> {
    nom::character::streaming::char(ascii_char as char)
}

fn map_int<'a, O, F>(first: F) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, O>
where
    F: Fn(&'a Buf) -> IResult<&'a Buf, &'a Buf>,
    O: std::str::FromStr,
{
    let to_str = map_res(first, |u: &'a Buf| std::str::from_utf8(u));
    map_res(to_str, |s| s.parse::<O>())
}
