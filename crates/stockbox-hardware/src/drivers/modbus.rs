//! Modbus RTU relay bank.
//!
//! Frames follow the standard RTU layout:
//!
//! ```text
//! ┌───────┬──────┬───────────────┬──────────┐
//! │ slave │ func │ payload       │ CRC (LE) │
//! └───────┴──────┴───────────────┴──────────┘
//! ```
//!
//! Only three functions are used: write single coil (`0x05`) to switch one
//! relay, write multiple coils (`0x0F`) to release every relay on
//! disconnect, and read coils (`0x01`) as a health check.
//!
//! The serial port is blocking, so each transaction runs on the blocking
//! thread pool. The port stays shared with the driver while the task runs:
//! a caller that gives up on a slow transaction leaves the port connected,
//! and the next transaction waits for the abandoned one to time out.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use serialport::SerialPort;
use stockbox_core::RelayConfig;
use tracing::{debug, info, warn};

use crate::error::{HardwareError, Result};
use crate::traits::{Device, RelayBank};

const FN_READ_COILS: u8 = 0x01;
const FN_WRITE_SINGLE_COIL: u8 = 0x05;
const FN_WRITE_MULTIPLE_COILS: u8 = 0x0F;
const EXCEPTION_FLAG: u8 = 0x80;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Serial read timeout for one response.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn finish_frame(mut frame: BytesMut) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.put_u16_le(crc);
    frame.to_vec()
}

/// Write single coil request.
pub fn write_coil_frame(slave: u8, address: u16, on: bool) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(slave);
    frame.put_u8(FN_WRITE_SINGLE_COIL);
    frame.put_u16(address);
    frame.put_u16(if on { COIL_ON } else { COIL_OFF });
    finish_frame(frame)
}

/// Write multiple coils request setting `count` coils from address 0.
pub fn write_all_coils_frame(slave: u8, count: u16, on: bool) -> Vec<u8> {
    let byte_count = count.div_ceil(8) as usize;
    let mut frame = BytesMut::with_capacity(9 + byte_count);
    frame.put_u8(slave);
    frame.put_u8(FN_WRITE_MULTIPLE_COILS);
    frame.put_u16(0);
    frame.put_u16(count);
    frame.put_u8(byte_count as u8);
    for i in 0..byte_count {
        let bits_in_byte = (usize::from(count) - i * 8).min(8);
        let value = if on { (1u16 << bits_in_byte) - 1 } else { 0 };
        frame.put_u8(value as u8);
    }
    finish_frame(frame)
}

/// Read coils request.
pub fn read_coils_frame(slave: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(slave);
    frame.put_u8(FN_READ_COILS);
    frame.put_u16(address);
    frame.put_u16(count);
    finish_frame(frame)
}

/// Validate a complete response frame against the request.
pub fn check_response(slave: u8, function: u8, frame: &[u8]) -> Result<()> {
    if frame.len() < 5 {
        return Err(HardwareError::invalid_data(format!(
            "response too short ({} bytes)",
            frame.len()
        )));
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected = crc16(body);
    if received != expected {
        return Err(HardwareError::communication(format!(
            "CRC mismatch: expected {expected:04X}, got {received:04X}"
        )));
    }

    if body[0] != slave {
        return Err(HardwareError::invalid_data(format!(
            "response from slave {}, expected {}",
            body[0], slave
        )));
    }

    if body[1] == function | EXCEPTION_FLAG {
        return Err(HardwareError::communication(format!(
            "Modbus exception {:#04X} for function {:#04X}",
            body[2], function
        )));
    }

    if body[1] != function {
        return Err(HardwareError::invalid_data(format!(
            "unexpected function {:#04X} in response",
            body[1]
        )));
    }

    Ok(())
}

/// Send a request and read the response, whose normal length is `expected`.
fn transact(port: &mut dyn SerialPort, request: &[u8], expected: usize) -> Result<Vec<u8>> {
    port.clear(serialport::ClearBuffer::Input)
        .map_err(|e| HardwareError::communication(e.to_string()))?;
    port.write_all(request)?;
    port.flush()?;

    // slave + function tell us whether this is an exception (5 bytes total)
    let mut response = vec![0u8; 2];
    port.read_exact(&mut response)?;

    let remaining = if response[1] & EXCEPTION_FLAG != 0 {
        3
    } else {
        expected - 2
    };
    let mut rest = vec![0u8; remaining];
    port.read_exact(&mut rest)?;
    response.extend_from_slice(&rest);

    check_response(request[0], request[1], &response)?;
    Ok(response)
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Relay bank on a Modbus RTU serial line.
pub struct ModbusRelayBank {
    name: String,
    config: RelayConfig,
    port: Option<SharedPort>,
}

impl std::fmt::Debug for ModbusRelayBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRelayBank")
            .field("name", &self.name)
            .field("port", &self.config.port)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

impl ModbusRelayBank {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            name: format!("Modbus relay {}", config.port),
            config,
            port: None,
        }
    }

    /// Run one transaction on the blocking pool.
    async fn request(&mut self, frame: Vec<u8>, expected: usize) -> Result<Vec<u8>> {
        let port = self
            .port
            .clone()
            .ok_or_else(|| HardwareError::disconnected(self.name.clone()))?;

        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
            transact(&mut **port, &frame, expected)
        })
        .await
        .map_err(|e| HardwareError::communication(format!("serial task failed: {e}")))?
    }
}

impl Device for ModbusRelayBank {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        info!("Opening relay bank on {} at {} baud", self.config.port, self.config.baud_rate);
        let builder = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(SERIAL_TIMEOUT);
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| HardwareError::communication(format!("serial task failed: {e}")))?
            .map_err(|e| HardwareError::communication(e.to_string()))?;
        self.port = Some(Arc::new(Mutex::new(port)));

        // Verify the board answers before declaring success
        if let Err(e) = self.health_check().await {
            self.port = None;
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.port.is_none() {
            return Ok(());
        }

        let frame = write_all_coils_frame(self.config.slave_address, self.config.channels, false);
        let result = self.request(frame, 8).await.map(|_| ());
        if let Err(e) = &result {
            warn!("Failed to release relays on disconnect: {}", e);
        }
        self.port = None;
        result
    }

    async fn health_check(&mut self) -> Result<()> {
        let frame = read_coils_frame(self.config.slave_address, 0, 1);
        self.request(frame, 6).await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl RelayBank for ModbusRelayBank {
    fn channel_count(&self) -> u16 {
        self.config.channels
    }

    async fn set_channel(&mut self, channel: u16, on: bool) -> Result<()> {
        if channel >= self.config.channels {
            return Err(HardwareError::invalid_data(format!(
                "relay channel {} outside 0..{}",
                channel, self.config.channels
            )));
        }

        debug!("Relay channel {} -> {}", channel, if on { "on" } else { "off" });
        let frame = write_coil_frame(self.config.slave_address, channel, on);
        let response = self.request(frame.clone(), 8).await?;
        if response != frame {
            return Err(HardwareError::invalid_data(
                "write coil response does not echo request",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_coil_on_frame() {
        assert_eq!(
            write_coil_frame(1, 0, true),
            vec![0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x8C, 0x3A]
        );
    }

    #[test]
    fn test_write_coil_off_frame() {
        assert_eq!(
            write_coil_frame(1, 0, false),
            vec![0x01, 0x05, 0x00, 0x00, 0x00, 0x00, 0xCD, 0xCA]
        );
    }

    #[test]
    fn test_write_all_coils_frame_layout() {
        let frame = write_all_coils_frame(1, 32, true);
        assert_eq!(&frame[..7], &[0x01, 0x0F, 0x00, 0x00, 0x00, 0x20, 0x04]);
        assert_eq!(&frame[7..11], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.len(), 13);

        let partial = write_all_coils_frame(1, 10, true);
        assert_eq!(&partial[7..9], &[0xFF, 0x03]);
    }

    #[test]
    fn test_read_coils_frame_crc_is_valid() {
        let frame = read_coils_frame(1, 0, 1);
        assert_eq!(&frame[..6], &[0x01, 0x01, 0x00, 0x00, 0x00, 0x01]);
        let crc = u16::from_le_bytes([frame[6], frame[7]]);
        assert_eq!(crc, crc16(&frame[..6]));
    }

    #[test]
    fn test_check_response_accepts_echo() {
        let frame = write_coil_frame(1, 5, true);
        assert!(check_response(1, FN_WRITE_SINGLE_COIL, &frame).is_ok());
    }

    #[test]
    fn test_check_response_rejects_bad_crc() {
        let mut frame = write_coil_frame(1, 5, true);
        frame[7] ^= 0xFF;
        assert!(matches!(
            check_response(1, FN_WRITE_SINGLE_COIL, &frame),
            Err(HardwareError::CommunicationError { .. })
        ));
    }

    #[test]
    fn test_check_response_reports_exception() {
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u8(FN_WRITE_SINGLE_COIL | EXCEPTION_FLAG);
        body.put_u8(0x02);
        let frame = finish_frame(body);

        let err = check_response(1, FN_WRITE_SINGLE_COIL, &frame).unwrap_err();
        assert!(err.to_string().contains("exception"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_transaction_keeps_port() {
        // a pty with nobody answering on the other end
        let Ok((mut master, _slave)) = serialport::TTYPort::pair() else {
            return;
        };
        master.set_timeout(Duration::from_millis(200)).unwrap();
        let port: Box<dyn SerialPort> = Box::new(master);
        let mut bank = ModbusRelayBank::new(RelayConfig::default());
        bank.port = Some(Arc::new(Mutex::new(port)));

        let attempt = tokio::time::timeout(Duration::from_millis(10), bank.health_check()).await;
        assert!(attempt.is_err());
        assert!(bank.is_connected());

        // the next transaction runs once the abandoned one has timed out
        let err = bank.health_check().await.unwrap_err();
        assert!(!matches!(err, HardwareError::Disconnected { .. }));
        assert!(bank.is_connected());
    }

    #[test]
    fn test_check_response_rejects_other_slave() {
        let frame = write_coil_frame(2, 0, true);
        assert!(check_response(1, FN_WRITE_SINGLE_COIL, &frame).is_err());
    }
}
