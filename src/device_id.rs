//! Stable per-(GPU, driver) identifier used to namespace persisted caches.

use std::fmt;

/// A 64-bit value derived from `(vendor_id << 32 | device_id) XOR driver_version`.
///
/// Stable across process runs for the same physical device and driver, used
/// to key [`cache/devices/Device_0x<hex>/`](crate::cache::registry) directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// A sentinel value used when a `Device_0x...` directory name fails to
    /// parse. Such directories are skipped rather than trusted.
    pub const INVALID: DeviceId = DeviceId(0);

    /// Derive a `DeviceId` from Vulkan physical-device properties.
    pub fn from_properties(vendor_id: u32, device_id: u32, driver_version: u32) -> Self {
        let packed = ((vendor_id as u64) << 32) | (device_id as u64);
        DeviceId(packed ^ driver_version as u64)
    }

    /// Whether this id is the `INVALID` sentinel.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Directory-safe description, e.g. `Device_0x1a2b3c4d5e6f7890`.
    pub fn directory_name(self) -> String {
        format!("Device_0x{:016x}", self.0)
    }

    /// Parse a directory name of the form `Device_0x<hex>`.
    ///
    /// Returns [`DeviceId::INVALID`] if the name doesn't match the expected
    /// shape or the hex payload doesn't parse. Callers should skip such
    /// directories rather than treat them as a real device.
    pub fn from_directory_name(name: &str) -> Self {
        let Some(hex) = name.strip_prefix("Device_0x") else {
            return Self::INVALID;
        };
        match u64::from_str_radix(hex, 16) {
            Ok(value) if value != 0 => DeviceId(value),
            _ => Self::INVALID,
        }
    }

    /// Raw 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_directory_name() {
        let id = DeviceId::from_properties(0x10de, 0x2782, 0x5623_1001);
        let round_tripped = DeviceId::from_directory_name(&id.directory_name());
        assert_eq!(id, round_tripped);
    }

    #[test]
    fn unparseable_hex_yields_invalid() {
        assert_eq!(
            DeviceId::from_directory_name("Device_0xZZZZ"),
            DeviceId::INVALID
        );
        assert_eq!(
            DeviceId::from_directory_name("not_a_device_dir"),
            DeviceId::INVALID
        );
    }

    #[test]
    fn stable_across_calls() {
        let a = DeviceId::from_properties(0x10de, 0x1234, 7);
        let b = DeviceId::from_properties(0x10de, 0x1234, 7);
        assert_eq!(a, b);
    }
}
