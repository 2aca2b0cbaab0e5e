//! In-process bus of simulated drives
//!
//! Each device owns a word-addressed register memory and answers the four
//! supported function codes the way a real drive does: echoes for writes and
//! diagnostics, byte-counted payloads for reads, exception frames for unknown
//! functions and unmapped addresses. Device-specific side effects (status bits
//! that follow commands, self-clearing triggers) plug in through
//! [`DeviceBehavior`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use errors::{DriveError, DriveResult};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::Transport;
use crate::protocol::codec::BROADCAST_ADDRESS;
use crate::protocol::constants::{
    ExceptionCode, FunctionCode, DIAGNOSTIC_RETURN_QUERY, EXCEPTION_FLAG, MAX_READ_REGISTERS,
};
use crate::protocol::crc::{crc16, verify_crc};

/// Word-addressed memory of one simulated device
///
/// Only mapped addresses answer; everything else raises
/// "illegal data address".
#[derive(Debug, Clone, Default)]
pub struct RegisterMemory {
    words: BTreeMap<u16, u16>,
}

impl RegisterMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `count` zeroed words starting at `start`
    pub fn with_range(mut self, start: u16, count: u16) -> Self {
        self.map_range(start, count);
        self
    }

    pub fn map_range(&mut self, start: u16, count: u16) {
        for offset in 0..count {
            if let Some(address) = start.checked_add(offset) {
                self.words.entry(address).or_insert(0);
            }
        }
    }

    pub fn is_mapped(&self, address: u16) -> bool {
        self.words.contains_key(&address)
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.words.get(&address).copied()
    }

    /// Store a word, mapping the address if needed
    pub fn set(&mut self, address: u16, value: u16) {
        self.words.insert(address, value);
    }

    /// High word at `address`, low word at `address + 1`
    pub fn get_u32(&self, address: u16) -> Option<u32> {
        let high = self.get(address)?;
        let low = self.get(address.checked_add(1)?)?;
        Some((u32::from(high) << 16) | u32::from(low))
    }

    pub fn set_u32(&mut self, address: u16, value: u32) {
        self.set(address, (value >> 16) as u16);
        self.set(address.wrapping_add(1), value as u16);
    }

    fn all_mapped(&self, start: u16, count: u16) -> bool {
        (0..count).all(|offset| {
            start
                .checked_add(offset)
                .is_some_and(|address| self.is_mapped(address))
        })
    }
}

/// Device-specific reactions to bus traffic
pub trait DeviceBehavior: Send {
    /// Called after `count` words starting at `address` were written
    fn after_write(&mut self, _memory: &mut RegisterMemory, _address: u16, _count: u16) {}

    /// Called before `count` words starting at `address` are read
    fn before_read(&mut self, _memory: &mut RegisterMemory, _address: u16, _count: u16) {}
}

/// One-shot fault applied to the next exchange with a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Flip the last CRC byte of the reply
    CorruptCrc,
    /// Apply the request but send no reply
    DropReply,
    /// Alter the echoed value field of a write or diagnostic reply
    WrongEcho,
    /// Reply with this exception code instead of processing the request
    Exception(u8),
}

struct SimulatedDevice {
    memory: RegisterMemory,
    behavior: Option<Box<dyn DeviceBehavior>>,
    faults: VecDeque<Fault>,
}

impl SimulatedDevice {
    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        let address = request[0];
        let function = request[1];

        if let Some(Fault::Exception(code)) = self.faults.front().copied() {
            self.faults.pop_front();
            return exception(address, function, code);
        }

        match FunctionCode::from_u8(function) {
            Some(FunctionCode::ReadHoldingRegisters) => self.read(request),
            Some(FunctionCode::WriteSingleRegister) => self.write_single(request),
            Some(FunctionCode::WriteMultipleRegisters) => self.write_multiple(request),
            Some(FunctionCode::Diagnostics) => diagnostic(request),
            None => exception(
                address,
                function,
                ExceptionCode::IllegalFunction.as_u8(),
            ),
        }
    }

    fn read(&mut self, request: &[u8]) -> Vec<u8> {
        let (start, count) = (word_at(request, 2), word_at(request, 4));
        if count == 0 || count > MAX_READ_REGISTERS {
            return exception(
                request[0],
                request[1],
                ExceptionCode::IllegalDataValue.as_u8(),
            );
        }
        if !self.memory.all_mapped(start, count) {
            return exception(
                request[0],
                request[1],
                ExceptionCode::IllegalDataAddress.as_u8(),
            );
        }
        if let Some(behavior) = self.behavior.as_mut() {
            behavior.before_read(&mut self.memory, start, count);
        }

        let mut reply = vec![request[0], request[1], (count * 2) as u8];
        for offset in 0..count {
            let word = self.memory.get(start + offset).unwrap_or_default();
            reply.extend_from_slice(&word.to_be_bytes());
        }
        reply
    }

    fn write_single(&mut self, request: &[u8]) -> Vec<u8> {
        let (address, value) = (word_at(request, 2), word_at(request, 4));
        if !self.memory.is_mapped(address) {
            return exception(
                request[0],
                request[1],
                ExceptionCode::IllegalDataAddress.as_u8(),
            );
        }
        self.memory.set(address, value);
        if let Some(behavior) = self.behavior.as_mut() {
            behavior.after_write(&mut self.memory, address, 1);
        }
        request[..6].to_vec()
    }

    fn write_multiple(&mut self, request: &[u8]) -> Vec<u8> {
        let (start, count) = (word_at(request, 2), word_at(request, 4));
        let byte_count = request.get(6).copied().map(usize::from).unwrap_or_default();
        if byte_count != usize::from(count) * 2 || request.len() < 7 + byte_count + 2 {
            return exception(
                request[0],
                request[1],
                ExceptionCode::IllegalDataValue.as_u8(),
            );
        }
        if !self.memory.all_mapped(start, count) {
            return exception(
                request[0],
                request[1],
                ExceptionCode::IllegalDataAddress.as_u8(),
            );
        }
        for offset in 0..count {
            let value = word_at(request, 7 + usize::from(offset) * 2);
            self.memory.set(start + offset, value);
        }
        if let Some(behavior) = self.behavior.as_mut() {
            behavior.after_write(&mut self.memory, start, count);
        }
        request[..6].to_vec()
    }
}

fn word_at(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

fn exception(address: u8, function: u8, code: u8) -> Vec<u8> {
    vec![address, function | EXCEPTION_FLAG, code]
}

fn diagnostic(request: &[u8]) -> Vec<u8> {
    if word_at(request, 2) == DIAGNOSTIC_RETURN_QUERY {
        request[..6].to_vec()
    } else {
        exception(
            request[0],
            request[1],
            ExceptionCode::IllegalFunction.as_u8(),
        )
    }
}

/// Request frames kept for inspection; older frames are dropped first
pub const REQUEST_LOG_CAPACITY: usize = 256;

fn seal(mut reply: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&reply);
    reply.extend_from_slice(&crc.to_le_bytes());
    reply
}

/// A bus of simulated devices behind the [`Transport`] trait
pub struct SimulatedBus {
    devices: Mutex<BTreeMap<u8, SimulatedDevice>>,
    requests: Mutex<VecDeque<Vec<u8>>>,
    request_total: AtomicUsize,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(VecDeque::new()),
            request_total: AtomicUsize::new(0),
        }
    }

    /// Attach a device with plain memory semantics
    pub fn add_device(&self, bus_address: u8, memory: RegisterMemory) {
        self.insert(bus_address, memory, None);
    }

    /// Attach a device whose side effects come from `behavior`
    pub fn add_device_with_behavior(
        &self,
        bus_address: u8,
        memory: RegisterMemory,
        behavior: impl DeviceBehavior + 'static,
    ) {
        self.insert(bus_address, memory, Some(Box::new(behavior)));
    }

    fn insert(
        &self,
        bus_address: u8,
        memory: RegisterMemory,
        behavior: Option<Box<dyn DeviceBehavior>>,
    ) {
        debug!("Simulated device attached at bus address {}", bus_address);
        self.devices.lock().insert(
            bus_address,
            SimulatedDevice {
                memory,
                behavior,
                faults: VecDeque::new(),
            },
        );
    }

    /// Queue a fault for the next exchange with `bus_address`
    pub fn inject_fault(&self, bus_address: u8, fault: Fault) -> DriveResult<()> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&bus_address)
            .ok_or_else(|| DriveError::Transport(format!("no simulated device {bus_address}")))?;
        device.faults.push_back(fault);
        Ok(())
    }

    /// Run `f` against a device's memory
    pub fn with_memory<R>(
        &self,
        bus_address: u8,
        f: impl FnOnce(&mut RegisterMemory) -> R,
    ) -> Option<R> {
        self.devices
            .lock()
            .get_mut(&bus_address)
            .map(|device| f(&mut device.memory))
    }

    pub fn word(&self, bus_address: u8, address: u16) -> Option<u16> {
        self.with_memory(bus_address, |memory| memory.get(address))
            .flatten()
    }

    pub fn set_word(&self, bus_address: u8, address: u16, value: u16) {
        self.with_memory(bus_address, |memory| memory.set(address, value));
    }

    /// The most recent request frames, oldest first
    ///
    /// At most [`REQUEST_LOG_CAPACITY`] frames are retained.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().iter().cloned().collect()
    }

    /// Requests seen since the bus was created, including dropped log entries
    pub fn request_count(&self) -> usize {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

impl Transport for SimulatedBus {
    fn transmit_and_maybe_receive(
        &self,
        frame: &[u8],
        expect_response: bool,
    ) -> DriveResult<Vec<u8>> {
        self.request_total.fetch_add(1, Ordering::Relaxed);
        {
            let mut requests = self.requests.lock();
            if requests.len() == REQUEST_LOG_CAPACITY {
                requests.pop_front();
            }
            requests.push_back(frame.to_vec());
        }

        // Devices silently drop frames they cannot trust
        if frame.len() < 8 || verify_crc(frame).is_err() {
            trace!("Simulated bus ignored malformed frame");
            return if expect_response {
                Err(DriveError::Timeout("simulated bus".to_string()))
            } else {
                Ok(Vec::new())
            };
        }

        let target = frame[0];
        let mut devices = self.devices.lock();

        if target == BROADCAST_ADDRESS {
            for device in devices.values_mut() {
                device.handle(frame);
            }
            return Ok(Vec::new());
        }

        let Some(device) = devices.get_mut(&target) else {
            return Err(DriveError::Timeout(format!("simulated device {target}")));
        };

        let fault = match device.faults.front() {
            Some(Fault::Exception(_)) | None => None,
            Some(_) => device.faults.pop_front(),
        };
        let mut reply = device.handle(frame);
        drop(devices);

        if !expect_response {
            return Ok(Vec::new());
        }

        match fault {
            Some(Fault::DropReply) => {
                return Err(DriveError::Timeout(format!("simulated device {target}")))
            },
            Some(Fault::WrongEcho) if reply.len() >= 6 => reply[5] ^= 0x01,
            _ => {},
        }

        let mut reply = seal(reply);
        if fault == Some(Fault::CorruptCrc) {
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }
        Ok(reply)
    }

    fn describe(&self) -> String {
        "simulated bus".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocol::Frame;

    fn request(bytes: &[u8]) -> Vec<u8> {
        let mut frame = Frame::from_slice(bytes).unwrap();
        frame.seal().unwrap();
        frame.to_vec()
    }

    fn bus() -> SimulatedBus {
        let bus = SimulatedBus::new();
        bus.add_device(1, RegisterMemory::new().with_range(0x0018, 8));
        bus
    }

    #[test]
    fn test_single_write_echoes_and_stores() {
        let bus = bus();
        let frame = request(&[0x01, 0x06, 0x00, 0x1E, 0x20, 0x00]);
        let reply = bus.transmit_and_maybe_receive(&frame, true).unwrap();
        assert_eq!(reply, frame);
        assert_eq!(bus.word(1, 0x001E), Some(0x2000));
    }

    #[test]
    fn test_multi_write_then_read() {
        let bus = bus();
        let write = request(&[
            0x01, 0x10, 0x00, 0x1C, 0x00, 0x02, 0x04, 0xFF, 0xFF, 0xFF, 0xF6,
        ]);
        let reply = bus.transmit_and_maybe_receive(&write, true).unwrap();
        assert_eq!(&reply[..6], &write[..6]);
        assert_eq!(bus.with_memory(1, |m| m.get_u32(0x001C)).flatten(), Some(0xFFFF_FFF6));

        let read = request(&[0x01, 0x03, 0x00, 0x1C, 0x00, 0x02]);
        let reply = bus.transmit_and_maybe_receive(&read, true).unwrap();
        assert_eq!(&reply[..7], &[0x01, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xF6]);
        verify_crc(&reply).unwrap();
    }

    #[test]
    fn test_unmapped_address_raises_exception() {
        let bus = bus();
        let read = request(&[0x01, 0x03, 0x05, 0x00, 0x00, 0x01]);
        let reply = bus.transmit_and_maybe_receive(&read, true).unwrap();
        assert_eq!(&reply[..3], &[0x01, 0x83, 0x02]);
    }

    #[test]
    fn test_unknown_device_times_out() {
        let bus = bus();
        let read = request(&[0x07, 0x03, 0x00, 0x18, 0x00, 0x01]);
        assert!(matches!(
            bus.transmit_and_maybe_receive(&read, true),
            Err(DriveError::Timeout(_))
        ));
    }

    #[test]
    fn test_broadcast_applies_without_reply() {
        let bus = bus();
        bus.add_device(2, RegisterMemory::new().with_range(0x001E, 1));
        let frame = request(&[0x00, 0x06, 0x00, 0x1E, 0x00, 0x08]);
        let reply = bus.transmit_and_maybe_receive(&frame, false).unwrap();
        assert!(reply.is_empty());
        assert_eq!(bus.word(1, 0x001E), Some(0x0008));
        assert_eq!(bus.word(2, 0x001E), Some(0x0008));
    }

    #[test]
    fn test_faults_are_one_shot() {
        let bus = bus();
        let frame = request(&[0x01, 0x06, 0x00, 0x1E, 0x00, 0x01]);

        bus.inject_fault(1, Fault::CorruptCrc).unwrap();
        let reply = bus.transmit_and_maybe_receive(&frame, true).unwrap();
        assert!(verify_crc(&reply).is_err());

        bus.inject_fault(1, Fault::DropReply).unwrap();
        assert!(bus.transmit_and_maybe_receive(&frame, true).is_err());

        bus.inject_fault(1, Fault::WrongEcho).unwrap();
        let reply = bus.transmit_and_maybe_receive(&frame, true).unwrap();
        assert_ne!(&reply[..6], &frame[..6]);
        verify_crc(&reply).unwrap();

        bus.inject_fault(1, Fault::Exception(4)).unwrap();
        let reply = bus.transmit_and_maybe_receive(&frame, true).unwrap();
        assert_eq!(&reply[..3], &[0x01, 0x86, 0x04]);

        let reply = bus.transmit_and_maybe_receive(&frame, true).unwrap();
        assert_eq!(reply, frame);
        assert_eq!(bus.request_count(), 5);
    }

    #[test]
    fn test_request_log_is_bounded() {
        let bus = bus();
        let first = request(&[0x01, 0x08, 0x00, 0x00, 0x00, 0x00]);
        bus.transmit_and_maybe_receive(&first, true).unwrap();
        let frame = request(&[0x01, 0x08, 0x00, 0x00, 0x12, 0x34]);
        for _ in 0..REQUEST_LOG_CAPACITY {
            bus.transmit_and_maybe_receive(&frame, true).unwrap();
        }

        let requests = bus.requests();
        assert_eq!(requests.len(), REQUEST_LOG_CAPACITY);
        assert!(requests.iter().all(|r| r == &frame));
        assert_eq!(bus.request_count(), REQUEST_LOG_CAPACITY + 1);

        bus.clear_requests();
        assert!(bus.requests().is_empty());
        assert_eq!(bus.request_count(), REQUEST_LOG_CAPACITY + 1);
    }

    #[test]
    fn test_diagnostic_echo() {
        let bus = bus();
        let frame = request(&[0x01, 0x08, 0x00, 0x00, 0x12, 0x34]);
        assert_eq!(bus.transmit_and_maybe_receive(&frame, true).unwrap(), frame);
    }
}
