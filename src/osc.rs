//! OSC message codec
//!
//! A message is a NUL-terminated address, a type tag string starting with
//! `,`, then one big-endian argument per tag. Strings are NUL-terminated and
//! every field is padded to a multiple of four bytes. Only `i` (int32),
//! `f` (float32) and `s` (string) arguments are supported; bundles are not.

use core::fmt;

use heapless::Vec;

/// Maximum number of arguments kept per message
pub const MAX_ARGUMENTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The packet ends in the middle of a field
    Truncated,
    /// The type tag string does not start with `,`
    MissingTypeTag,
    /// Type tag other than `i`, `f` or `s`
    UnsupportedTag(u8),
    /// A string is not valid UTF-8
    InvalidString,
    /// More than [`MAX_ARGUMENTS`] arguments
    TooManyArguments,
    /// The output buffer is too small
    BufferFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => f.write_str("truncated packet"),
            Self::MissingTypeTag => f.write_str("missing type tag"),
            Self::UnsupportedTag(tag) => write!(f, "unsupported type tag {:?}", char::from(*tag)),
            Self::InvalidString => f.write_str("invalid string"),
            Self::TooManyArguments => f.write_str("too many arguments"),
            Self::BufferFull => f.write_str("buffer full"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument<'a> {
    Int(i32),
    Float(f32),
    Str(&'a str),
}

impl Argument<'_> {
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => b'i',
            Self::Float(_) => b'f',
            Self::Str(_) => b's',
        }
    }
}

/// Decoded message borrowing from its packet
#[derive(Debug, Clone, PartialEq)]
pub struct Message<'a> {
    address: &'a str,
    args: Vec<Argument<'a>, MAX_ARGUMENTS>,
}

impl<'a> Message<'a> {
    pub fn parse(packet: &'a [u8]) -> Result<Self, Error> {
        let (address, mut offset) = read_str(packet, 0)?;
        let mut args = Vec::new();

        // A message without type tags carries no arguments
        if offset >= packet.len() {
            return Ok(Self { address, args });
        }

        let (tags, next) = read_str(packet, offset)?;
        let tags = tags.strip_prefix(',').ok_or(Error::MissingTypeTag)?;
        offset = next;

        for tag in tags.bytes() {
            let argument = match tag {
                b'i' => Argument::Int(i32::from_be_bytes(read_word(packet, offset)?)),
                b'f' => Argument::Float(f32::from_be_bytes(read_word(packet, offset)?)),
                b's' => {
                    let (text, next) = read_str(packet, offset)?;
                    offset = next;
                    args.push(Argument::Str(text))
                        .map_err(|_| Error::TooManyArguments)?;
                    continue;
                }
                other => return Err(Error::UnsupportedTag(other)),
            };
            offset += 4;
            args.push(argument).map_err(|_| Error::TooManyArguments)?;
        }

        Ok(Self { address, args })
    }

    pub fn new(address: &'a str) -> Self {
        Self {
            address,
            args: Vec::new(),
        }
    }

    /// Append an argument, builder style
    pub fn with(mut self, argument: Argument<'a>) -> Result<Self, Error> {
        self.args.push(argument).map_err(|_| Error::TooManyArguments)?;
        Ok(self)
    }

    pub fn address(&self) -> &'a str {
        self.address
    }

    pub fn args(&self) -> &[Argument<'a>] {
        &self.args
    }

    /// Encode into `buf`, returning the packet length
    pub fn write(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut writer = Writer { buf, len: 0 };
        writer.put_str(self.address.as_bytes())?;

        let mut tags: Vec<u8, { MAX_ARGUMENTS + 1 }> = Vec::new();
        let _ = tags.push(b',');
        for argument in &self.args {
            let _ = tags.push(argument.tag());
        }
        writer.put_str(&tags)?;

        for argument in &self.args {
            match argument {
                Argument::Int(value) => writer.put(&value.to_be_bytes())?,
                Argument::Float(value) => writer.put(&value.to_be_bytes())?,
                Argument::Str(text) => writer.put_str(text.as_bytes())?,
            }
        }
        Ok(writer.len)
    }
}

const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Read a padded string at `offset`, returning it with the offset of the next field
fn read_str(packet: &[u8], offset: usize) -> Result<(&str, usize), Error> {
    let rest = packet.get(offset..).ok_or(Error::Truncated)?;
    let end = rest.iter().position(|&byte| byte == 0).ok_or(Error::Truncated)?;
    let text = core::str::from_utf8(&rest[..end]).map_err(|_| Error::InvalidString)?;
    let next = offset + padded(end + 1);
    if next > packet.len() {
        return Err(Error::Truncated);
    }
    Ok((text, next))
}

fn read_word(packet: &[u8], offset: usize) -> Result<[u8; 4], Error> {
    packet
        .get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::Truncated)
}

struct Writer<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.len + bytes.len();
        self.buf
            .get_mut(self.len..end)
            .ok_or(Error::BufferFull)?
            .copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// String with its terminator and zero padding
    fn put_str(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.put(bytes)?;
        let end = self.len - bytes.len() + padded(bytes.len() + 1);
        self.buf
            .get_mut(self.len..end)
            .ok_or(Error::BufferFull)?
            .fill(0);
        self.len = end;
        Ok(())
    }
}
