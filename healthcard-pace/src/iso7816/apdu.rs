//! Structures related to application protocol data units (APDUs).
//!
//! A command APDU is encoded once, when it is constructed; whether the short or the extended
//! length fields are used follows from the amount of command data (`Nc`) and the expected response
//! length (`Ne`) alone.


use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};


/// Largest `Ne` that can be requested with a short Le field (encoded as `0x00`).
pub const EXPECTED_LENGTH_WILDCARD_SHORT: usize = 256;

/// Largest `Ne` that can be requested with an extended Le field (encoded as `0x0000`).
pub const EXPECTED_LENGTH_WILDCARD_EXTENDED: usize = 65536;

/// Largest `Nc` that can be transmitted in a single command.
pub const MAX_COMMAND_DATA_LENGTH: usize = 65535;

const MAX_SHORT_COMMAND_DATA_LENGTH: usize = 255;


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EncodeError {
    CommandBodyDataTooLarge { maximum: usize, obtained: usize },
    ExpectedResponseLengthOutOfBounds { maximum: usize, obtained: usize },
}
impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandBodyDataTooLarge { maximum, obtained }
                => write!(f, "command data too large: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
            Self::ExpectedResponseLengthOutOfBounds { maximum, obtained }
                => write!(f, "expected response length {} is out of bounds (maximum {})", obtained, maximum),
        }
    }
}
impl std::error::Error for EncodeError {
}


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum DecodeError {
    InsufficientResponseData { obtained: usize },
    TruncatedCommandHeader { obtained: usize },
    InconsistentCommandLength { obtained: usize },
}
impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResponseData { obtained }
                => write!(f, "response must contain at least 2 bytes, obtained {}", obtained),
            Self::TruncatedCommandHeader { obtained }
                => write!(f, "command must contain at least 4 bytes, obtained {}", obtained),
            Self::InconsistentCommandLength { obtained }
                => write!(f, "command length {} does not match its length fields", obtained),
        }
    }
}
impl std::error::Error for DecodeError {
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    /// Normal processing.
    pub const OK: Self = Self::new(0x90, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
        }
    }

    pub const fn from_word(word: u16) -> Self {
        let [sw1, sw2] = word.to_be_bytes();
        Self::new(sw1, sw2)
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}


/// The structural case of a command APDU.
///
/// "Case" refers to the cases in ISO/IEC 7816-3:2006 § 12.1.3.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ApduCase {
    /// `[header]`
    Case1,
    /// `[header] [Le]`
    Case2Short,
    /// `[header] [0x00] [LeMSB] [LeLSB]`
    Case2Extended,
    /// `[header] [Lc] [Data]`
    Case3Short,
    /// `[header] [0x00] [LcMSB] [LcLSB] [Data]`
    Case3Extended,
    /// `[header] [Lc] [Data] [Le]`
    Case4Short,
    /// `[header] [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]`
    Case4Extended,
}
impl ApduCase {
    /// Selects the case for the given data length and expected response length.
    ///
    /// `nc == 0` means that no data is sent.
    pub const fn select(nc: usize, ne: Option<usize>) -> Self {
        Self::decide(nc > 0, ne.is_some(), nc > MAX_SHORT_COMMAND_DATA_LENGTH, match ne {
            Some(ne) => ne > EXPECTED_LENGTH_WILDCARD_SHORT,
            None => false,
        })
    }

    /// The case decision as a pure function of its four inputs.
    pub const fn decide(has_data: bool, has_ne: bool, nc_extended: bool, ne_extended: bool) -> Self {
        match (has_data, has_ne) {
            (false, false) => Self::Case1,
            (false, true) => if ne_extended { Self::Case2Extended } else { Self::Case2Short },
            (true, false) => if nc_extended { Self::Case3Extended } else { Self::Case3Short },
            (true, true) => if nc_extended || ne_extended { Self::Case4Extended } else { Self::Case4Short },
        }
    }

    pub const fn is_extended(&self) -> bool {
        matches!(self, Self::Case2Extended | Self::Case3Extended | Self::Case4Extended)
    }

    /// Offset of the command data within the encoded command, if the case carries data.
    pub const fn data_offset(&self) -> Option<usize> {
        match self {
            Self::Case1 | Self::Case2Short | Self::Case2Extended => None,
            Self::Case3Short | Self::Case4Short => Some(5),
            Self::Case3Extended | Self::Case4Extended => Some(7),
        }
    }
}


/// Appends the Lc field for `nc` bytes of data.
fn encode_lc(out: &mut Vec<u8>, nc: usize, extended: bool) {
    if extended {
        // [0x00] [LcMSB] [LcLSB]
        let [msb, lsb] = (nc as u16).to_be_bytes();
        out.extend([0x00, msb, lsb]);
    } else {
        // [Lc]
        out.push(nc as u8);
    }
}

/// Appends the Le field for an expected response length of `ne` bytes.
///
/// In case 2E the leading `0x00` byte is part of the Le field; in case 4E it has already been
/// emitted as part of the Lc field.
fn encode_le(out: &mut Vec<u8>, ne: usize, case: ApduCase) {
    match case {
        ApduCase::Case2Short | ApduCase::Case4Short => {
            // 256 maps to 0x00
            out.push((ne % EXPECTED_LENGTH_WILDCARD_SHORT) as u8);
        },
        ApduCase::Case2Extended | ApduCase::Case4Extended => {
            // 65536 maps to 0x0000
            let [msb, lsb] = ((ne % EXPECTED_LENGTH_WILDCARD_EXTENDED) as u16).to_be_bytes();
            if case == ApduCase::Case2Extended {
                out.push(0x00);
            }
            out.extend([msb, lsb]);
        },
        ApduCase::Case1 | ApduCase::Case3Short | ApduCase::Case3Extended => {},
    }
}


/// A command APDU, encoded at construction.
///
/// Two commands are equal if their encoded bytes are equal.
#[derive(Clone)]
pub struct Command {
    header: CommandHeader,
    ne: Option<usize>,
    case: ApduCase,
    bytes: Vec<u8>,
}
impl Command {
    /// Creates a command from its header, the command data and the expected response length.
    ///
    /// Empty data is treated like absent data. `ne` of `Some(256)` or `Some(65536)` requests "as
    /// much as possible" in the short and extended encoding, respectively.
    pub fn new(header: CommandHeader, data: Option<&[u8]>, ne: Option<usize>) -> Result<Self, EncodeError> {
        if let Some(ne) = ne {
            if ne > EXPECTED_LENGTH_WILDCARD_EXTENDED {
                return Err(EncodeError::ExpectedResponseLengthOutOfBounds {
                    maximum: EXPECTED_LENGTH_WILDCARD_EXTENDED,
                    obtained: ne,
                });
            }
        }
        let data = data.unwrap_or(&[]);
        let nc = data.len();
        if nc > MAX_COMMAND_DATA_LENGTH {
            return Err(EncodeError::CommandBodyDataTooLarge {
                maximum: MAX_COMMAND_DATA_LENGTH,
                obtained: nc,
            });
        }

        let case = ApduCase::select(nc, ne);
        let mut bytes = Vec::with_capacity(4 + 3 + nc + 3);
        bytes.extend(header.to_bytes());
        if nc > 0 {
            encode_lc(&mut bytes, nc, case.is_extended());
            bytes.extend(data);
        }
        if let Some(ne) = ne {
            encode_le(&mut bytes, ne, case);
        }

        Ok(Self {
            header,
            ne,
            case,
            bytes,
        })
    }

    /// Creates a command consisting of the header only (case 1).
    pub fn header_only(header: CommandHeader) -> Self {
        Self {
            header,
            ne: None,
            case: ApduCase::Case1,
            bytes: header.to_bytes().to_vec(),
        }
    }

    /// Parses an encoded command APDU, recovering its header, data and expected response length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let inconsistent = || DecodeError::InconsistentCommandLength { obtained: bytes.len() };
        if bytes.len() < 4 {
            return Err(DecodeError::TruncatedCommandHeader { obtained: bytes.len() });
        }
        let header = CommandHeader::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[4..];

        let (data, ne): (&[u8], Option<usize>) = match body.len() {
            0 => (&[], None),
            1 => (&[], Some(short_le(body[0]))),
            _ if body[0] != 0x00 => {
                // short Lc
                let nc = usize::from(body[0]);
                if body.len() == 1 + nc {
                    (&body[1..], None)
                } else if body.len() == 1 + nc + 1 {
                    (&body[1..1+nc], Some(short_le(body[1+nc])))
                } else {
                    return Err(inconsistent());
                }
            },
            3 => (&[], Some(extended_le(body[1], body[2]))),
            n if n > 3 => {
                // extended Lc
                let nc = usize::from(u16::from_be_bytes([body[1], body[2]]));
                if nc == 0 {
                    return Err(inconsistent());
                }
                if body.len() == 3 + nc {
                    (&body[3..], None)
                } else if body.len() == 3 + nc + 2 {
                    (&body[3..3+nc], Some(extended_le(body[3+nc], body[3+nc+1])))
                } else {
                    return Err(inconsistent());
                }
            },
            _ => return Err(inconsistent()),
        };

        let command = Self::new(header, Some(data), ne)
            .map_err(|_| inconsistent())?;
        if command.bytes != bytes {
            // e.g. extended encoding where a short one would have sufficed
            return Err(inconsistent());
        }
        Ok(command)
    }

    pub fn header(&self) -> CommandHeader { self.header }
    pub fn cla(&self) -> u8 { self.header.cla }
    pub fn ins(&self) -> u8 { self.header.ins }
    pub fn p1(&self) -> u8 { self.header.p1 }
    pub fn p2(&self) -> u8 { self.header.p2 }

    /// The expected response length `Ne`, if any.
    pub fn ne(&self) -> Option<usize> { self.ne }

    pub fn apdu_case(&self) -> ApduCase { self.case }

    /// The command data, or `None` if no data is sent.
    pub fn data(&self) -> Option<&[u8]> {
        let offset = self.case.data_offset()?;
        Some(&self.bytes[offset..offset + self.nc()])
    }

    /// The number of command data bytes `Nc`.
    pub fn nc(&self) -> usize {
        match self.case {
            ApduCase::Case1 | ApduCase::Case2Short | ApduCase::Case2Extended => 0,
            ApduCase::Case3Short | ApduCase::Case4Short => usize::from(self.bytes[4]),
            ApduCase::Case3Extended | ApduCase::Case4Extended => usize::from(u16::from_be_bytes([self.bytes[5], self.bytes[6]])),
        }
    }

    /// The complete encoded command.
    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.bytes)
    }
}
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl Eq for Command {}
impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the data may carry secrets; only show its length
        f.debug_struct("Command")
            .field("header", &self.header)
            .field("case", &self.case)
            .field("nc", &self.nc())
            .field("ne", &self.ne)
            .finish()
    }
}

fn short_le(le: u8) -> usize {
    if le == 0x00 { EXPECTED_LENGTH_WILDCARD_SHORT } else { usize::from(le) }
}

fn extended_le(msb: u8, lsb: u8) -> usize {
    match u16::from_be_bytes([msb, lsb]) {
        0x0000 => EXPECTED_LENGTH_WILDCARD_EXTENDED,
        other => usize::from(other),
    }
}


/// A response APDU: optional response data followed by the status bytes.
///
/// Two responses are equal if their raw bytes are equal.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Response {
    bytes: Vec<u8>,
}
impl Response {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_vec(bytes.to_vec())
    }

    pub fn from_vec(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError::InsufficientResponseData { obtained: bytes.len() });
        }
        Ok(Self { bytes })
    }

    /// Assembles a response from data and status word.
    pub fn new(data: &[u8], trailer: ResponseTrailer) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 2);
        bytes.extend(data);
        bytes.extend(trailer.to_bytes());
        Self { bytes }
    }

    /// A response without data and with the status word `90 00`.
    pub fn ok() -> Self {
        Self::new(&[], ResponseTrailer::OK)
    }

    /// The response data, or `None` if the response only contains the status word.
    pub fn data(&self) -> Option<&[u8]> {
        let data = &self.bytes[..self.bytes.len() - 2];
        if data.is_empty() { None } else { Some(data) }
    }

    /// The number of response data bytes `Nr`.
    pub fn nr(&self) -> usize { self.bytes.len() - 2 }

    pub fn sw1(&self) -> u8 { self.bytes[self.bytes.len() - 2] }
    pub fn sw2(&self) -> u8 { self.bytes[self.bytes.len() - 1] }
    pub fn sw(&self) -> u16 { self.trailer().to_word() }

    pub fn trailer(&self) -> ResponseTrailer {
        ResponseTrailer::new(self.sw1(), self.sw2())
    }

    pub fn is_ok(&self) -> bool { self.trailer() == ResponseTrailer::OK }

    pub fn bytes(&self) -> &[u8] { &self.bytes }
}
impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("nr", &self.nr())
            .field("trailer", &self.trailer())
            .finish()
    }
}
