//! Deserialize data from the bytecode protocol.
//!
//! Every parser here is a nom *streaming* parser: running out of input
//! yields `Err::Incomplete` instead of an error, which [`try_wrap`] turns
//! into "not enough bytes yet" so the decoders can suspend and resume at
//! any byte boundary.
use bytes::Bytes;
use nom::{
    bytes::streaming::take,
    combinator::map,
    error::{ErrorKind, ParseError},
    multi::many_m_n,
    number::streaming::{be_i16, be_i32, be_u8},
    Err::Incomplete,
    IResult, InputLength,
    Needed::Unknown,
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::error::{Error, KafkaCode, Result};

/// Runs `parser` over `buffer[progress..limit]`.
///
/// Returns `Ok(None)` while the range does not yet hold a complete value,
/// and the value together with the number of bytes it occupies otherwise.
/// Malformed input is reported as [`Error::ParsingError`].
pub fn try_wrap<O, F>(
    mut parser: F,
    buffer: &Bytes,
    progress: usize,
    limit: usize,
) -> Result<Option<(O, usize)>>
where
    F: FnMut(NomBytes) -> IResult<NomBytes, O>,
{
    let input = buffer.slice(progress..limit);
    let length = input.len();
    match parser(NomBytes::new(input)) {
        Ok((rest, value)) => Ok(Some((value, length - rest.input_len()))),
        Err(Incomplete(_)) => Ok(None),
        Err(err) => {
            tracing::error!("ERROR: Failed parsing at {} {:?}", progress, err);
            Err(Error::ParsingError(buffer.slice(progress..limit)))
        }
    }
}

pub fn parse_kafka_code(s: NomBytes) -> IResult<NomBytes, KafkaCode> {
    map(be_i16, |n| {
        FromPrimitive::from_i16(n).unwrap_or(KafkaCode::Unknown)
    })(s)
}

/// Raw base 128 varint, at most 10 bytes.
pub fn take_varint<E>(i: NomBytes) -> nom::IResult<NomBytes, u64, E>
where
    E: ParseError<NomBytes>,
{
    let mut res: u64 = 0;
    let mut count: u32 = 0;
    let mut remainder = i;
    loop {
        let (rest, byte) = match be_u8::<NomBytes, ()>(remainder.clone()) {
            Ok(parsed) => parsed,
            Err(_) => return Err(Incomplete(Unknown)),
        };
        if count >= 10 {
            return Err(nom::Err::Error(E::from_error_kind(
                remainder,
                ErrorKind::TooLarge,
            )));
        }
        remainder = rest;
        res |= ((byte as u64) & 127) << (count * 7);
        count += 1;
        if (byte >> 7) == 0 {
            return Ok((remainder, res));
        }
    }
}

/// Zig-zag encoded signed varlong.
pub fn parse_varlong(s: NomBytes) -> IResult<NomBytes, i64> {
    let (s, raw) = take_varint(s)?;
    Ok((s, ((raw >> 1) as i64) ^ -((raw & 1) as i64)))
}

/// Zig-zag encoded signed varint.
pub fn parse_varint(s: NomBytes) -> IResult<NomBytes, i32> {
    let (s, value) = parse_varlong(s)?;
    Ok((s, value as i32))
}

/// Bytes prefixed by a zig-zag varint length, `None` when the length is `-1`.
pub fn parse_varint_bytes(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = parse_varint(s)?;
    if length < 0 {
        return Ok((s, None));
    }
    let (s, bytes) = take(length as usize)(s)?;
    Ok((s, Some(bytes.into_bytes())))
}

pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i16(s)?;
    let (s, string) = take(length.max(0) as usize)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i32(s)?;
    let (s, string) = take(length.max(0) as usize)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: nom::error::ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let i = input.clone();
        let (i, length) = be_i32(i)?;
        if length <= 0 {
            return Ok((i, vec![]));
        }
        many_m_n(length as usize, length as usize, f)(i)
    }
}

pub fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i16(s)?;
    if length == -1 {
        return Ok((s, None));
    }

    let (s, string) = take(length as u16)(s)?;
    Ok((s, Some(string.into_bytes())))
}

/// Copies a wire string into an owned `String`.
pub fn to_string(bytes: &Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::DecodingUtf8Error)
}
