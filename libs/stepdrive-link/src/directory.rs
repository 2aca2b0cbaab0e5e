//! Per-controller address -> register lookup
//!
//! Response parsing dispatches decoded payload slices through the directory.
//! All mutation happens under one lock, so a lookup never observes a
//! half-applied swap or a partially committed response.

use std::collections::BTreeMap;

use errors::{DriveError, DriveResult};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::bytes::Width;
use crate::register::Register;

/// Address-keyed register map owned by one controller
#[derive(Debug, Default)]
pub struct RegisterDirectory {
    entries: RwLock<BTreeMap<u16, Register>>,
}

impl RegisterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory, rejecting duplicate addresses
    pub fn from_registers(registers: impl IntoIterator<Item = Register>) -> DriveResult<Self> {
        let directory = Self::new();
        for register in registers {
            directory.register(register)?;
        }
        Ok(directory)
    }

    /// Add a register; fails if its address is already occupied
    pub fn register(&self, register: Register) -> DriveResult<()> {
        let mut entries = self.entries.write();
        let address = register.address();
        if entries.contains_key(&address) {
            return Err(DriveError::DuplicateRegister(address));
        }
        trace!("Registered {} at 0x{:04X}", register.name(), address);
        entries.insert(address, register);
        Ok(())
    }

    /// Remove and return the register at `address`
    pub fn unregister(&self, address: u16) -> DriveResult<Register> {
        self.entries
            .write()
            .remove(&address)
            .ok_or(DriveError::UnknownRegister(address))
    }

    /// Replace the occupant of `register.address()` in one step
    ///
    /// Returns the previous occupant. Fails when the slot is empty, since a
    /// swap is only meaningful between variants of an existing address.
    pub fn swap(&self, register: Register) -> DriveResult<Register> {
        let mut entries = self.entries.write();
        let address = register.address();
        let slot = entries
            .get_mut(&address)
            .ok_or(DriveError::UnknownRegister(address))?;
        let previous = std::mem::replace(slot, register);
        debug!(
            "Swapped register 0x{:04X}: {} -> {}",
            address,
            previous.name(),
            slot.name()
        );
        Ok(previous)
    }

    /// Snapshot of the register at `address`
    pub fn get(&self, address: u16) -> DriveResult<Register> {
        self.with_register(address, Register::clone)
    }

    /// Stored value of the register at `address`
    pub fn value(&self, address: u16) -> DriveResult<i64> {
        self.with_register(address, Register::value)
    }

    /// Run `f` against the register at `address` under the read lock
    pub fn with_register<R>(&self, address: u16, f: impl FnOnce(&Register) -> R) -> DriveResult<R> {
        let entries = self.entries.read();
        entries
            .get(&address)
            .map(f)
            .ok_or(DriveError::UnknownRegister(address))
    }

    /// Start address of the combined register whose later words hold `address`
    ///
    /// `None` when `address` is a register start or lies outside every register.
    pub fn covering(&self, address: u16, base: Width) -> Option<u16> {
        let entries = self.entries.read();
        let (&start, register) = entries.range(..address).next_back()?;
        let slots = register.slots(base).ok()?;
        (usize::from(address - start) < slots).then_some(start)
    }

    pub fn contains(&self, address: u16) -> bool {
        self.entries.read().contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered addresses in ascending order
    pub fn addresses(&self) -> Vec<u16> {
        self.entries.read().keys().copied().collect()
    }

    /// All registers in address order
    pub fn snapshot(&self) -> Vec<Register> {
        self.entries.read().values().cloned().collect()
    }

    /// Validate every `(address, bytes)` pair, then store all of them
    ///
    /// Nothing is stored unless every slice passes its register's size and
    /// domain checks.
    pub fn commit(&self, updates: &[(u16, &[u8])]) -> DriveResult<()> {
        let mut entries = self.entries.write();

        let mut decoded = Vec::with_capacity(updates.len());
        for (address, bytes) in updates {
            let register = entries
                .get(address)
                .ok_or(DriveError::UnknownRegister(*address))?;
            decoded.push((*address, register.decode(bytes)?));
        }

        for (address, value) in decoded {
            if let Some(register) = entries.get_mut(&address) {
                register.set_value(value)?;
                trace!("Committed 0x{:04X} = {}", address, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::register::Domain;

    fn directory() -> RegisterDirectory {
        RegisterDirectory::from_registers([
            Register::word("cmd1", 0x001E, Domain::flags(&[0x01, 0x2000]), 0),
            Register::word("current", 0x021E, Domain::range(5, 100), 100),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let dir = directory();
        let err = dir
            .register(Register::word("again", 0x001E, Domain::range(0, 1), 0))
            .unwrap_err();
        assert!(matches!(err, DriveError::DuplicateRegister(0x001E)));
        assert_eq!(dir.get(0x001E).unwrap().name(), "cmd1");
    }

    #[test]
    fn test_unregister() {
        let dir = directory();
        let removed = dir.unregister(0x021E).unwrap();
        assert_eq!(removed.name(), "current");
        assert!(matches!(
            dir.unregister(0x021E).unwrap_err(),
            DriveError::UnknownRegister(0x021E)
        ));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_swap_variants_at_same_address() {
        let dir = RegisterDirectory::new();
        dir.register(Register::word("angle_a", 0x0311, Domain::linear(0, 15), 0))
            .unwrap();

        let previous = dir
            .swap(Register::word("angle_b", 0x0311, Domain::linear(0, 7), 0))
            .unwrap();
        assert_eq!(previous.name(), "angle_a");
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get(0x0311).unwrap().name(), "angle_b");

        let err = dir
            .swap(Register::word("nowhere", 0x0400, Domain::range(0, 1), 0))
            .unwrap_err();
        assert!(matches!(err, DriveError::UnknownRegister(0x0400)));
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let dir = directory();
        let good: &[u8] = &[0x20, 0x01];
        let bad: &[u8] = &[0x00, 0x01];

        let err = dir.commit(&[(0x001E, good), (0x021E, bad)]).unwrap_err();
        assert!(matches!(err, DriveError::OutOfRange { address: 0x021E, .. }));
        assert_eq!(dir.value(0x001E).unwrap(), 0);
        assert_eq!(dir.value(0x021E).unwrap(), 100);

        let fresh: &[u8] = &[0x00, 0x32];
        dir.commit(&[(0x001E, good), (0x021E, fresh)]).unwrap();
        assert_eq!(dir.value(0x001E).unwrap(), 0x2001);
        assert_eq!(dir.value(0x021E).unwrap(), 50);
    }

    #[test]
    fn test_commit_unknown_address() {
        let dir = directory();
        let zero: &[u8] = &[0x00, 0x00];
        let err = dir.commit(&[(0x0999, zero)]).unwrap_err();
        assert!(matches!(err, DriveError::UnknownRegister(0x0999)));
    }

    #[test]
    fn test_covering_finds_combined_owner() {
        let dir = directory();
        dir.register(Register::double_word("position", 0x001C, Domain::range(-10, 10), 0))
            .unwrap();
        assert_eq!(dir.covering(0x001D, Width::Word), Some(0x001C));
        assert_eq!(dir.covering(0x001C, Width::Word), None);
        assert_eq!(dir.covering(0x001F, Width::Word), None);
        assert_eq!(dir.covering(0x0010, Width::Word), None);
    }

    #[test]
    fn test_addresses_are_sorted() {
        let dir = directory();
        assert_eq!(dir.addresses(), vec![0x001E, 0x021E]);
    }
}
