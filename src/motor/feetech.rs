// Feetech STS serial protocol
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status format: [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech motors
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Encoder resolution, steps per motor revolution
pub const STEPS_PER_REV: u16 = 4096;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Register addresses for STS3215
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Register {
    // EEPROM area
    PGain = 21,             // 1 byte
    DGain = 22,             // 1 byte
    IGain = 23,             // 1 byte
    ProtectionCurrent = 28, // 2 bytes, 6.5 mA per unit

    // RAM area
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte
    GoalPosition = 42,    // 2 bytes, relative steps in step mode (signed)
    GoalVelocity = 46,    // 2 bytes, steps/s (signed)
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, 0..4095
    PresentVelocity = 58, // 2 bytes, steps/s (signed)
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    /// Continuous rotation at GoalVelocity
    Velocity = 1,
    /// Each GoalPosition write moves by that many steps
    Step = 3,
}

/// Error types for Feetech communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    !(sum as u8)
}

/// Frame an instruction packet
pub fn encode_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    packet.push(checksum(&packet[2..]));
    packet
}

/// Check a status packet body (`[id, length, error, params.., checksum]`)
/// and return its params
fn parse_status(expected_id: u8, body: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: String| FeetechError::InvalidResponse {
        id: expected_id,
        reason,
    };

    let [id, length, rest @ ..] = body else {
        return Err(invalid(format!("Truncated status: {:02X?}", body)));
    };
    if *id != expected_id {
        return Err(invalid(format!("ID mismatch: expected {}, got {}", expected_id, id)));
    }
    if rest.len() != *length as usize || rest.len() < 2 {
        return Err(invalid(format!("Bad length {} for {} bytes", length, rest.len())));
    }

    let (payload, received) = rest.split_at(rest.len() - 1);
    if checksum(&body[..body.len() - 1]) != received[0] {
        return Err(FeetechError::ChecksumMismatch { id: *id });
    }
    if payload[0] != 0 {
        return Err(FeetechError::MotorError {
            id: *id,
            status: payload[0],
        });
    }
    Ok(payload[1..].to_vec())
}

/// Bit 15 = sign (1 = negative), bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    if value >= 0 {
        value as u16
    } else {
        0x8000 | value.unsigned_abs()
    }
}

pub fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Feetech motor bus over any byte stream, a serial port in practice
pub struct FeetechBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }
}

impl<P: Read + Write> FeetechBus<P> {
    pub fn with_port(port: P) -> Self {
        Self { port }
    }

    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = encode_packet(id, instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;

        let timed_out = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id }
            } else {
                FeetechError::Io(e)
            }
        };

        let mut header = [0u8; 4];
        self.port.read_exact(&mut header).map_err(timed_out)?;
        if header[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Invalid header: {:02X?}", &header[..2]),
            });
        }

        let mut body = vec![header[2], header[3]];
        body.resize(2 + header[3] as usize, 0);
        self.port.read_exact(&mut body[2..]).map_err(timed_out)?;
        parse_status(id, &body)
    }

    /// True if the motor answers
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Motor {} {:?} <- {}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])?;
        Ok(())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        debug!("Motor {} {:?} <- {}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])?;
        Ok(())
    }

    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        match response[..] {
            [lo, hi] => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", response.len()),
            }),
        }
    }

    pub fn read_i16(&mut self, id: u8, register: Register) -> Result<i16> {
        Ok(decode_sign_magnitude(self.read_u16(id, register)?))
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, enabled as u8)?;
        self.write_u8(id, Register::Lock, enabled as u8)
    }

    /// Torque must be off while the mode changes
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Present position, 0..STEPS_PER_REV
    pub fn position(&mut self, id: u8) -> Result<u16> {
        Ok(self.read_u16(id, Register::PresentPosition)? % STEPS_PER_REV)
    }

    /// Present velocity, steps/s
    pub fn velocity(&mut self, id: u8) -> Result<i16> {
        self.read_i16(id, Register::PresentVelocity)
    }
}
