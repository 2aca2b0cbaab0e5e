//! RS-485 serial transport
//!
//! Frames are written whole; responses are read in two steps: the header
//! (whose length depends on the request) and then the remainder announced by
//! the header.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use errors::{transport_error, DriveError, DriveResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort};
use tracing::{debug, info, warn};

use super::{data_length, header_length, Transport};

/// Line parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Stop bits, written as `1` or `2` in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("stop bits must be 1 or 2, got {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Serial line settings, fixed for the lifetime of the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    /// Drive factory settings: 9600 baud, 8E1, 5 s response timeout
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            timeout_ms: 5000,
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Blocking serial transport; one exchange at a time
pub struct SerialTransport {
    port: Mutex<Box<dyn SerialPort>>,
    settings: SerialSettings,
}

impl SerialTransport {
    /// Open and configure the serial port
    pub fn open(settings: SerialSettings) -> DriveResult<Self> {
        if settings.port.is_empty() {
            return Err(DriveError::Configuration(
                "serial port name is empty".to_string(),
            ));
        }

        // RS-485 multidrop does not use RTS/CTS
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(FlowControl::None)
            .timeout(settings.timeout())
            .open()
            .map_err(|e| transport_error!("failed to open {}: {}", settings.port, e))?;

        info!(
            "Opened serial port {} @ {} baud ({:?} parity, {} stop bits, {} ms timeout)",
            settings.port,
            settings.baud_rate,
            settings.parity,
            u8::from(settings.stop_bits),
            settings.timeout_ms
        );

        Ok(Self {
            port: Mutex::new(port),
            settings,
        })
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn read_fully(&self, port: &mut dyn SerialPort, buf: &mut [u8]) -> DriveResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match port.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(DriveError::IncompleteRead {
                        read: filled,
                        expected: buf.len(),
                    })
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(if filled == 0 {
                        DriveError::Timeout(self.settings.port.clone())
                    } else {
                        DriveError::IncompleteRead {
                            read: filled,
                            expected: buf.len(),
                        }
                    });
                },
                Err(e) => return Err(DriveError::Io(e)),
            }
        }
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn transmit_and_maybe_receive(
        &self,
        frame: &[u8],
        expect_response: bool,
    ) -> DriveResult<Vec<u8>> {
        let header_len = if expect_response {
            header_length(frame)?
        } else {
            0
        };

        let mut port = self.port.lock();

        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("Failed to clear input buffer on {}: {}", self.settings.port, e);
        }

        let written = match port.write(frame) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(DriveError::Io(e)),
        };
        if written != frame.len() {
            return Err(DriveError::IncompleteWrite {
                written,
                expected: frame.len(),
            });
        }
        port.flush()?;

        if !expect_response {
            return Ok(Vec::new());
        }

        let mut response = vec![0u8; header_len];
        self.read_fully(port.as_mut(), &mut response)?;

        let remaining = data_length(&response)?;
        let start = response.len();
        response.resize(start + remaining, 0);
        self.read_fully(port.as_mut(), &mut response[start..])?;

        debug!("{} received {} bytes", self.settings.port, response.len());
        Ok(response)
    }

    fn describe(&self) -> String {
        self.settings.port.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_drive_factory_defaults() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_bits_conversion() {
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(3).is_err());
        assert_eq!(u8::from(StopBits::One), 1);
    }

    #[test]
    fn test_open_rejects_empty_port_name() {
        let err = SerialTransport::open(SerialSettings::default()).err().unwrap();
        assert!(matches!(err, DriveError::Configuration(_)));
    }
}
