use std::fmt;
use std::io;

use crate::iso7816::apdu;


#[derive(Debug)]
pub enum CommunicationError {
    Encode(apdu::EncodeError),
    Decode(apdu::DecodeError),
    Io(io::Error),
    CommandSizeTooLarge { maximum: usize, obtained: usize },
    ResponseSizeTooLarge { maximum: usize, obtained: usize },
    NoResponse,
    UnexpectedFrameTag { tag: u8 },
    InvalidFrameLength,
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "APDU encoding error: {}", e),
            Self::Decode(e) => write!(f, "APDU decoding error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::CommandSizeTooLarge { maximum, obtained }
                => write!(f, "command too large: {} bytes, maximum {} bytes", obtained, maximum),
            Self::ResponseSizeTooLarge { maximum, obtained }
                => write!(f, "response too large: {} bytes, maximum {} bytes", obtained, maximum),
            Self::NoResponse => write!(f, "card did not respond"),
            Self::UnexpectedFrameTag { tag } => write!(f, "unexpected frame tag 0x{:02X}", tag),
            Self::InvalidFrameLength => write!(f, "invalid frame length encoding"),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::CommandSizeTooLarge { .. } => None,
            Self::ResponseSizeTooLarge { .. } => None,
            Self::NoResponse => None,
            Self::UnexpectedFrameTag { .. } => None,
            Self::InvalidFrameLength => None,
        }
    }
}
impl From<apdu::EncodeError> for CommunicationError {
    fn from(value: apdu::EncodeError) -> Self { Self::Encode(value) }
}
impl From<apdu::DecodeError> for CommunicationError {
    fn from(value: apdu::DecodeError) -> Self { Self::Decode(value) }
}
impl From<io::Error> for CommunicationError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


/// A smart card compatible with ISO/IEC 7816.
pub trait SmartCard {
    /// Send a command APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Command) -> Result<apdu::Response, CommunicationError>;
}
impl<C: SmartCard + ?Sized> SmartCard for &mut C {
    fn communicate(&mut self, request: &apdu::Command) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}
impl<C: SmartCard + ?Sized> SmartCard for Box<C> {
    fn communicate(&mut self, request: &apdu::Command) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}
