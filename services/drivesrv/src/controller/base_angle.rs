//! Base angle families and partition selection
//!
//! A family pairs a base step angle with the enumerated partition register
//! that selects its step resolution. Several families may share one register
//! address; only the active family's variant sits in the register directory.

use std::fmt;

use errors::{DriveError, DriveResult};
use parking_lot::Mutex;
use stepdrive_link::{Register, RegisterDirectory};
use tracing::debug;

const ANGLE_EPSILON: f64 = 1e-9;

/// Outcome of a partition request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartitionChange {
    /// The partition moved to this option
    Changed(f64),
    /// No option lies in the requested direction; the partition stays put
    Unchanged(f64),
}

impl PartitionChange {
    pub fn value(self) -> f64 {
        match self {
            Self::Changed(value) | Self::Unchanged(value) => value,
        }
    }

    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

impl fmt::Display for PartitionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed(value) => write!(f, "changed to {value}°"),
            Self::Unchanged(value) => write!(f, "unchanged at {value}°"),
        }
    }
}

/// Pick the option closest to `requested` among those strictly on the side of
/// `current` that the request moves towards.
///
/// A request equal to `current`, or one with no option in its direction,
/// yields [`PartitionChange::Unchanged`].
pub fn nearest_partition(options: &[f64], current: f64, requested: f64) -> PartitionChange {
    let direction = if requested > current {
        1.0
    } else if requested < current {
        -1.0
    } else {
        return PartitionChange::Unchanged(current);
    };

    options
        .iter()
        .copied()
        .filter(|option| option * direction > current * direction)
        .min_by(|a, b| (a - requested).abs().total_cmp(&(b - requested).abs()))
        .map_or(PartitionChange::Unchanged(current), PartitionChange::Changed)
}

/// One base angle and its partition register variant
#[derive(Debug, Clone)]
pub struct BaseAngleFamily {
    angle: f64,
    register: Register,
    partitions: Vec<f64>,
}

impl BaseAngleFamily {
    /// `partitions[i]` is the step angle selected by raw register value `i`
    pub fn new(angle: f64, register: Register, partitions: Vec<f64>) -> Self {
        Self {
            angle,
            register,
            partitions,
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn address(&self) -> u16 {
        self.register.address()
    }

    pub fn partitions(&self) -> &[f64] {
        &self.partitions
    }

    fn matches(&self, angle: f64) -> bool {
        (self.angle - angle).abs() < ANGLE_EPSILON
    }
}

#[derive(Debug, Default)]
struct TableState {
    families: Vec<BaseAngleFamily>,
    active: Option<usize>,
    partition: Option<f64>,
}

impl TableState {
    fn find(&self, angle: f64) -> DriveResult<usize> {
        self.families
            .iter()
            .position(|family| family.matches(angle))
            .ok_or(DriveError::InvalidBaseAngle(angle))
    }

    fn active(&self) -> DriveResult<&BaseAngleFamily> {
        self.active
            .and_then(|index| self.families.get(index))
            .ok_or_else(|| DriveError::Unconfigured("no base angle families registered".to_string()))
    }
}

/// A controller's base angle families and the cached partition
#[derive(Debug, Default)]
pub struct BaseAngleTable {
    state: Mutex<TableState>,
}

impl BaseAngleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family; the first family becomes active and its register
    /// is placed in `directory`
    pub fn add_family(&self, directory: &RegisterDirectory, family: BaseAngleFamily) -> DriveResult<()> {
        if !(family.angle > 0.0 && family.angle <= 360.0) {
            return Err(DriveError::InvalidBaseAngle(family.angle));
        }
        let mut state = self.state.lock();
        if state.find(family.angle).is_ok() {
            return Err(DriveError::InvalidParameter {
                param: "base_angle".to_string(),
                reason: format!("{}° is already registered", family.angle),
            });
        }

        if state.active.is_none() {
            directory.register(family.register.clone())?;
            let index = state.families.len();
            state.active = Some(index);
        }
        state.families.push(family);
        Ok(())
    }

    /// Registered base angles in ascending order
    pub fn angles(&self) -> Vec<f64> {
        let mut angles: Vec<f64> = self.state.lock().families.iter().map(|f| f.angle).collect();
        angles.sort_by(f64::total_cmp);
        angles
    }

    pub fn partitions(&self, angle: f64) -> DriveResult<Vec<f64>> {
        let state = self.state.lock();
        let index = state.find(angle)?;
        Ok(state.families[index].partitions.clone())
    }

    pub fn active_angle(&self) -> Option<f64> {
        let state = self.state.lock();
        state.active().ok().map(BaseAngleFamily::angle)
    }

    /// Partition register address and options of the active family
    pub fn active_family(&self) -> DriveResult<(u16, Vec<f64>)> {
        let state = self.state.lock();
        let family = state.active()?;
        Ok((family.address(), family.partitions.clone()))
    }

    /// Make `angle` the active family, swapping its register into `directory`
    ///
    /// Returns the partition register address. The cached partition is
    /// cleared since it belonged to the previous family.
    pub fn activate(&self, directory: &RegisterDirectory, angle: f64) -> DriveResult<u16> {
        let mut state = self.state.lock();
        let index = state.find(angle)?;
        if state.active == Some(index) {
            return Ok(state.families[index].address());
        }

        let family = &state.families[index];
        let address = family.address();
        directory.swap(family.register.clone())?;
        state.active = Some(index);
        state.partition = None;
        debug!("Base angle {}° active at 0x{:04X}", angle, address);
        Ok(address)
    }

    /// Map a raw partition register value to its step angle
    pub fn partition_from_raw(&self, raw: i64) -> DriveResult<f64> {
        let state = self.state.lock();
        let family = state.active()?;
        usize::try_from(raw)
            .ok()
            .and_then(|index| family.partitions.get(index).copied())
            .ok_or(DriveError::UnmatchedPartition {
                angle: family.angle,
                raw,
            })
    }

    /// Raw register value selecting `partition` in the active family
    pub fn raw_for_partition(&self, partition: f64) -> DriveResult<i64> {
        let state = self.state.lock();
        let family = state.active()?;
        family
            .partitions
            .iter()
            .position(|option| (option - partition).abs() < ANGLE_EPSILON)
            .map(|index| index as i64)
            .ok_or_else(|| DriveError::InvalidParameter {
                param: "partition".to_string(),
                reason: format!("{partition}° is not an option for base angle {}°", family.angle),
            })
    }

    pub fn current_partition(&self) -> Option<f64> {
        self.state.lock().partition
    }

    pub fn set_current_partition(&self, partition: f64) {
        self.state.lock().partition = Some(partition);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use stepdrive_link::Domain;

    const FINE: [f64; 4] = [0.36, 0.18, 0.09, 0.036];
    const COARSE: [f64; 3] = [0.72, 0.36, 0.072];

    fn table() -> (BaseAngleTable, RegisterDirectory) {
        let directory = RegisterDirectory::new();
        let table = BaseAngleTable::new();
        table
            .add_family(
                &directory,
                BaseAngleFamily::new(
                    0.36,
                    Register::word("step_angle_036", 0x0311, Domain::linear(0, 3), 0),
                    FINE.to_vec(),
                ),
            )
            .unwrap();
        table
            .add_family(
                &directory,
                BaseAngleFamily::new(
                    0.72,
                    Register::word("step_angle_072", 0x0311, Domain::linear(0, 2), 0),
                    COARSE.to_vec(),
                ),
            )
            .unwrap();
        (table, directory)
    }

    #[test]
    fn test_nearest_partition_moves_in_requested_direction() {
        // Upwards from 0.09: candidates 0.18 and 0.36
        assert_eq!(nearest_partition(&FINE, 0.09, 0.1), PartitionChange::Changed(0.18));
        assert_eq!(nearest_partition(&FINE, 0.09, 0.3), PartitionChange::Changed(0.36));
        // Downwards from 0.18: candidates 0.09 and 0.036
        assert_eq!(nearest_partition(&FINE, 0.18, 0.17), PartitionChange::Changed(0.09));
        assert_eq!(nearest_partition(&FINE, 0.18, 0.0), PartitionChange::Changed(0.036));
    }

    #[test]
    fn test_nearest_partition_boundary_is_a_named_no_op() {
        assert_eq!(nearest_partition(&FINE, 0.36, 0.5), PartitionChange::Unchanged(0.36));
        assert_eq!(nearest_partition(&FINE, 0.036, 0.01), PartitionChange::Unchanged(0.036));
        assert_eq!(nearest_partition(&FINE, 0.09, 0.09), PartitionChange::Unchanged(0.09));
        assert!(!nearest_partition(&[], 0.09, 1.0).is_changed());
    }

    #[test]
    fn test_first_family_occupies_directory() {
        let (table, directory) = table();
        assert_eq!(table.active_angle(), Some(0.36));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(0x0311).unwrap().name(), "step_angle_036");
        assert_eq!(table.angles(), vec![0.36, 0.72]);
    }

    #[test]
    fn test_activate_swaps_register() {
        let (table, directory) = table();
        table.set_current_partition(0.18);

        let address = table.activate(&directory, 0.72).unwrap();
        assert_eq!(address, 0x0311);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(0x0311).unwrap().name(), "step_angle_072");
        assert_eq!(table.current_partition(), None);

        assert!(matches!(
            table.activate(&directory, 1.8),
            Err(DriveError::InvalidBaseAngle(_))
        ));
        assert_eq!(table.active_angle(), Some(0.72));
    }

    #[test]
    fn test_raw_partition_mapping() {
        let (table, _directory) = table();
        assert_eq!(table.partition_from_raw(2).unwrap(), 0.09);
        assert!(matches!(
            table.partition_from_raw(7),
            Err(DriveError::UnmatchedPartition { raw: 7, .. })
        ));
        assert_eq!(table.raw_for_partition(0.036).unwrap(), 3);
        assert!(table.raw_for_partition(0.072).is_err());
    }

    #[test]
    fn test_invalid_family_angle() {
        let directory = RegisterDirectory::new();
        let table = BaseAngleTable::new();
        let register = Register::word("bad", 0x0311, Domain::linear(0, 1), 0);
        assert!(matches!(
            table.add_family(&directory, BaseAngleFamily::new(400.0, register, vec![1.0])),
            Err(DriveError::InvalidBaseAngle(_))
        ));
        assert!(directory.is_empty());
    }
}
