//! Transport to a card simulator over a byte stream.
//!
//! Every command APDU is sent as a BER-TLV data object with tag `0x80`; the simulator answers with
//! the response APDU wrapped the same way.


use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, instrument, trace};

use crate::der_util::encode_primitive_length;
use crate::hex_string;
use crate::iso7816::apdu::{Command, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};


const FRAME_TAG: u8 = 0x80;


/// Configuration options for the simulator transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimulatorConfig {
    /// How long to wait for a response.
    pub read_timeout: Duration,

    /// How long to wait for a command to be accepted by the stream.
    pub write_timeout: Duration,

    /// Largest command APDU (in bytes) that may be sent.
    pub max_command_length: usize,

    /// Largest response APDU (in bytes) that is accepted.
    pub max_response_length: usize,
}
impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_command_length: 0x1000,
            max_response_length: 0x1000,
        }
    }
}
impl SimulatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_command_length(mut self, length: usize) -> Self {
        self.max_command_length = length;
        self
    }

    pub fn with_max_response_length(mut self, length: usize) -> Self {
        self.max_response_length = length;
        self
    }
}


/// A card reachable through a simulator stream.
pub struct SimulatorCard<S> {
    stream: S,
    config: SimulatorConfig,
}
impl<S: Read + Write> SimulatorCard<S> {
    /// Wraps an already-connected stream.
    ///
    /// Timeouts in `config` are not applied to the stream; see [`connect`] for TCP.
    pub fn new(stream: S, config: SimulatorConfig) -> Self {
        Self { stream, config }
    }

    pub fn config(&self) -> &SimulatorConfig { &self.config }

    pub fn into_inner(self) -> S { self.stream }

    fn read_frame(&mut self) -> Result<Vec<u8>, CommunicationError> {
        let mut tag = [0u8; 1];
        match self.stream.read_exact(&mut tag) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CommunicationError::NoResponse),
            Err(e) => return Err(e.into()),
        }
        if tag[0] != FRAME_TAG {
            return Err(CommunicationError::UnexpectedFrameTag { tag: tag[0] });
        }

        let mut first_length_byte = [0u8; 1];
        self.stream.read_exact(&mut first_length_byte)?;
        let length = if first_length_byte[0] & 0b1000_0000 == 0 {
            usize::from(first_length_byte[0])
        } else {
            let length_byte_count = usize::from(first_length_byte[0] & 0b0111_1111);
            if length_byte_count == 0 || length_byte_count > std::mem::size_of::<usize>() {
                return Err(CommunicationError::InvalidFrameLength);
            }
            let mut length_bytes = [0u8; std::mem::size_of::<usize>()];
            let start = length_bytes.len() - length_byte_count;
            self.stream.read_exact(&mut length_bytes[start..])?;
            usize::from_be_bytes(length_bytes)
        };
        if length > self.config.max_response_length {
            return Err(CommunicationError::ResponseSizeTooLarge {
                maximum: self.config.max_response_length,
                obtained: length,
            });
        }

        let mut value = vec![0u8; length];
        self.stream.read_exact(&mut value)?;
        Ok(value)
    }
}
impl<S: Read + Write> SmartCard for SimulatorCard<S> {
    #[instrument(skip_all, fields(header = ?request.header()))]
    fn communicate(&mut self, request: &Command) -> Result<Response, CommunicationError> {
        let command_bytes = request.bytes();
        if command_bytes.len() > self.config.max_command_length {
            return Err(CommunicationError::CommandSizeTooLarge {
                maximum: self.config.max_command_length,
                obtained: command_bytes.len(),
            });
        }

        let mut frame = Vec::with_capacity(command_bytes.len() + 4);
        frame.push(FRAME_TAG);
        encode_primitive_length(&mut frame, command_bytes.len());
        frame.extend(command_bytes);
        trace!("SEND: {}", hex_string(command_bytes));
        self.stream.write_all(&frame)?;
        self.stream.flush()?;

        let response_bytes = self.read_frame()?;
        trace!("RESPONSE: {}", hex_string(&response_bytes));
        let response = Response::from_vec(response_bytes)?;
        debug!("card responded with status {:04X} and {} data bytes", response.sw(), response.nr());
        Ok(response)
    }
}


/// Connects to a card simulator listening on a TCP socket.
pub fn connect<A: ToSocketAddrs>(address: A, config: SimulatorConfig) -> Result<SimulatorCard<TcpStream>, CommunicationError> {
    let stream = TcpStream::connect(address)?;
    stream.set_read_timeout(Some(config.read_timeout))?;
    stream.set_write_timeout(Some(config.write_timeout))?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "connected to card simulator");
    Ok(SimulatorCard::new(stream, config))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso7816::apdu::{CommandHeader, ResponseTrailer};
    use hex_literal::hex;
    use std::io::Cursor;

    /// A stream that replays canned simulator output and records what was written.
    struct LoopbackStream {
        incoming: Cursor<Vec<u8>>,
        outgoing: Vec<u8>,
    }
    impl LoopbackStream {
        fn new(incoming: &[u8]) -> Self {
            Self { incoming: Cursor::new(incoming.to_vec()), outgoing: Vec::new() }
        }
    }
    impl Read for LoopbackStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.incoming.read(buf) }
    }
    impl Write for LoopbackStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.outgoing.write(buf) }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    fn select_command() -> Command {
        Command::new(CommandHeader::new(0x00, 0xA4, 0x04, 0x0C), Some(&hex!("D2 76 00 01 44 80 00")), None).unwrap()
    }

    #[test]
    fn test_framing() {
        let mut card = SimulatorCard::new(LoopbackStream::new(&hex!("80 04 AB CD 90 00")), SimulatorConfig::default());
        let response = card.communicate(&select_command()).unwrap();
        assert_eq!(response, Response::new(&hex!("AB CD"), ResponseTrailer::OK));

        let stream = card.into_inner();
        assert_eq!(stream.outgoing, hex!("80 0C 00 A4 04 0C 07 D2 76 00 01 44 80 00"));
    }

    #[test]
    fn test_long_frame_length() {
        let mut incoming = hex!("80 81 82").to_vec();
        incoming.extend([0x5A; 0x80]);
        incoming.extend(hex!("90 00"));
        let mut card = SimulatorCard::new(LoopbackStream::new(&incoming), SimulatorConfig::default());
        let response = card.communicate(&select_command()).unwrap();
        assert_eq!(response.nr(), 0x80);
    }

    #[test]
    fn test_no_response() {
        let mut card = SimulatorCard::new(LoopbackStream::new(&[]), SimulatorConfig::default());
        assert!(matches!(card.communicate(&select_command()), Err(CommunicationError::NoResponse)));
    }

    #[test]
    fn test_wrong_frame_tag() {
        let mut card = SimulatorCard::new(LoopbackStream::new(&hex!("81 02 90 00")), SimulatorConfig::default());
        assert!(matches!(
            card.communicate(&select_command()),
            Err(CommunicationError::UnexpectedFrameTag { tag: 0x81 }),
        ));
    }

    #[test]
    fn test_size_limits() {
        let config = SimulatorConfig::new().with_max_command_length(8);
        let mut card = SimulatorCard::new(LoopbackStream::new(&hex!("80 02 90 00")), config);
        assert!(matches!(
            card.communicate(&select_command()),
            Err(CommunicationError::CommandSizeTooLarge { maximum: 8, obtained: 12 }),
        ));

        let config = SimulatorConfig::new().with_max_response_length(1);
        let mut card = SimulatorCard::new(LoopbackStream::new(&hex!("80 02 90 00")), config);
        assert!(matches!(
            card.communicate(&select_command()),
            Err(CommunicationError::ResponseSizeTooLarge { maximum: 1, obtained: 2 }),
        ));
    }

    #[test]
    fn test_short_response() {
        let mut card = SimulatorCard::new(LoopbackStream::new(&hex!("80 01 90")), SimulatorConfig::default());
        assert!(matches!(card.communicate(&select_command()), Err(CommunicationError::Decode(_))));
    }
}
