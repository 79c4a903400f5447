//! Byte-level encoding of the TraCI protocol
//!
//! All integers are big endian. A message is a `u32` total length (including
//! itself) followed by commands. A command is a `u8` length, or `0` followed by
//! a `u32` length when it does not fit in a byte, then the command id and its
//! payload. Strings are a `u32` byte count followed by UTF-8.

use crate::error::SimError;

pub const CMD_GETVERSION: u8 = 0x00;
pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7f;
pub const CMD_GET_EDGE_VARIABLE: u8 = 0xaa;
pub const RESPONSE_GET_EDGE_VARIABLE: u8 = 0xba;
pub const CMD_SET_TL_VARIABLE: u8 = 0xc2;

pub const LAST_STEP_VEHICLE_NUMBER: u8 = 0x10;
pub const LAST_STEP_MEAN_SPEED: u8 = 0x11;
pub const TL_PROGRAM: u8 = 0x23;

pub const TYPE_INTEGER: u8 = 0x09;
pub const TYPE_DOUBLE: u8 = 0x0b;
pub const TYPE_STRING: u8 = 0x0c;

pub const RTYPE_OK: u8 = 0x00;
pub const RTYPE_NOTIMPLEMENTED: u8 = 0x01;
pub const RTYPE_ERR: u8 = 0xff;

/// A single outgoing command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    id: u8,
    payload: Vec<u8>,
}

impl Command {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            payload: Vec::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.payload.push(value);
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.payload.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.payload.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        // TraCI strings are length-prefixed by a signed 32 bit count
        let len = i32::try_from(value.len()).unwrap_or(i32::MAX);
        self = self.i32(len);
        self.payload.extend_from_slice(&value.as_bytes()[..len as usize]);
        self
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let short_len = 1 + 1 + self.payload.len();
        if short_len <= u8::MAX as usize {
            buf.push(short_len as u8);
        } else {
            buf.push(0);
            buf.extend_from_slice(&((short_len + 4) as u32).to_be_bytes());
        }
        buf.push(self.id);
        buf.extend_from_slice(&self.payload);
    }
}

/// Frame `commands` as one message
pub fn encode_message(commands: &[Command]) -> Vec<u8> {
    let mut buf = vec![0; 4];
    for command in commands {
        command.encode_into(&mut buf);
    }
    let total = buf.len() as u32;
    buf[..4].copy_from_slice(&total.to_be_bytes());
    buf
}

/// Cursor over the body of a received message
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SimError> {
        if self.remaining() < n {
            return Err(SimError::Protocol(format!(
                "needed {n} bytes, {} left",
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SimError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SimError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> Result<i32, SimError> {
        self.array().map(i32::from_be_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, SimError> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn f64(&mut self) -> Result<f64, SimError> {
        self.array().map(f64::from_be_bytes)
    }

    pub fn string(&mut self) -> Result<String, SimError> {
        let len = self.i32()?;
        let len = usize::try_from(len)
            .map_err(|_| SimError::Protocol(format!("negative string length {len}")))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SimError::Protocol("string is not UTF-8".into()))
    }

    /// Expect a type tag, then read the value it announces
    pub fn typed_i32(&mut self) -> Result<i32, SimError> {
        self.expect_type(TYPE_INTEGER)?;
        self.i32()
    }

    pub fn typed_f64(&mut self) -> Result<f64, SimError> {
        self.expect_type(TYPE_DOUBLE)?;
        self.f64()
    }

    fn expect_type(&mut self, expected: u8) -> Result<(), SimError> {
        let found = self.u8()?;
        if found != expected {
            return Err(SimError::Protocol(format!(
                "expected type 0x{expected:02x}, found 0x{found:02x}"
            )));
        }
        Ok(())
    }

    /// Read one command, returning its id and a reader over its payload
    pub fn command(&mut self) -> Result<(u8, Reader<'a>), SimError> {
        let (len, header) = match self.u8()? {
            0 => (self.u32()? as usize, 5),
            short => (short as usize, 1),
        };
        if len < header + 1 {
            return Err(SimError::Protocol(format!("command length {len} too short")));
        }
        let id = self.u8()?;
        let body = self.take(len - header - 1)?;
        Ok((id, Reader::new(body)))
    }

    /// Read the status command that opens every response to `command`
    pub fn status(&mut self, command: u8) -> Result<(), SimError> {
        let (id, mut body) = self.command()?;
        if id != command {
            return Err(SimError::Protocol(format!(
                "status for 0x{id:02x} in reply to 0x{command:02x}"
            )));
        }
        let result = body.u8()?;
        let description = body.string()?;
        match result {
            RTYPE_OK => Ok(()),
            RTYPE_NOTIMPLEMENTED | RTYPE_ERR => Err(SimError::Command {
                command,
                description,
            }),
            other => Err(SimError::Protocol(format!(
                "unknown result type 0x{other:02x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_command_framing() {
        let msg = encode_message(&[Command::new(CMD_GET_EDGE_VARIABLE)
            .u8(LAST_STEP_VEHICLE_NUMBER)
            .string("E9")]);
        assert_eq!(
            msg,
            [0, 0, 0, 13, 9, 0xaa, 0x10, 0, 0, 0, 2, b'E', b'9'],
            "length prefix, command length, id, variable, string"
        );
    }

    #[test]
    fn long_command_uses_extended_length() {
        let id = "x".repeat(300);
        let msg = encode_message(&[Command::new(CMD_SET_TL_VARIABLE).string(&id)]);
        assert_eq!(msg.len(), 4 + 1 + 4 + 1 + 4 + 300);
        assert_eq!(msg[4], 0, "extended marker");
        assert_eq!(u32::from_be_bytes([msg[5], msg[6], msg[7], msg[8]]), 310);

        let mut reader = Reader::new(&msg[4..]);
        let (cmd, mut body) = reader.command().unwrap();
        assert_eq!(cmd, CMD_SET_TL_VARIABLE);
        assert_eq!(body.string().unwrap(), id);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn status_results() {
        let ok = encode_message(&[Command::new(CMD_SIMSTEP).u8(RTYPE_OK).string("")]);
        assert!(Reader::new(&ok[4..]).status(CMD_SIMSTEP).is_ok());

        let err = encode_message(&[Command::new(CMD_SET_TL_VARIABLE)
            .u8(RTYPE_ERR)
            .string("no such program")]);
        match Reader::new(&err[4..]).status(CMD_SET_TL_VARIABLE) {
            Err(SimError::Command { command, description }) => {
                assert_eq!(command, CMD_SET_TL_VARIABLE);
                assert_eq!(description, "no such program");
            }
            other => panic!("expected command error, got {other:?}"),
        }

        let mismatched = Reader::new(&ok[4..]).status(CMD_CLOSE);
        assert!(matches!(mismatched, Err(SimError::Protocol(_))));
    }

    #[test]
    fn truncated_input_is_a_protocol_error() {
        let mut reader = Reader::new(&[0, 0, 0]);
        assert!(matches!(reader.i32(), Err(SimError::Protocol(_))));

        let mut reader = Reader::new(&[1]);
        assert!(matches!(reader.command(), Err(SimError::Protocol(_))));
    }

    #[test]
    fn typed_values() {
        let msg = encode_message(&[Command::new(RESPONSE_GET_EDGE_VARIABLE)
            .u8(TYPE_DOUBLE)
            .f64(13.25)
            .u8(TYPE_INTEGER)
            .i32(-4)]);
        let (_, mut body) = Reader::new(&msg[4..]).command().unwrap();
        assert_eq!(body.typed_f64().unwrap(), 13.25);
        assert!(matches!(body.typed_f64(), Err(SimError::Protocol(_))), "wrong tag");
    }
}
