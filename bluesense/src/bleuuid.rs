//! Helpers for expanding 16-bit and 32-bit UUID shorthands to full 128-bit
//! UUIDs, for the Bluetooth base UUID and the vendor bases used by the
//! device families this crate knows about.

use uuid::Uuid;

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805f9b34fb`, into
/// which 16-bit and 32-bit assigned numbers are inserted.
const BLUETOOTH_BASE: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Base UUID of the Texas Instruments SensorTag services,
/// `f0000000-0451-4000-b000-000000000000`.
const SENSOR_TAG_BASE: u128 = 0xf0000000_0451_4000_b000_000000000000;

/// Base UUID of the Nordic Thingy:52 services,
/// `ef680000-9b35-4933-9b10-52ffa9740042`.
const THINGY52_BASE: u128 = 0xef680000_9b35_4933_9b10_52ffa9740042;

/// Base UUID of the Stollmann (Telit) serial transport characteristics,
/// `00000000-0000-1000-8000-008025000000`.
const STOLLMANN_BASE: u128 = 0x00000000_0000_1000_8000_008025000000;

const fn with_base(base: u128, value: u32) -> Uuid {
    Uuid::from_u128(base | (value as u128) << 96)
}

/// Expand a 16-bit assigned number to a full Bluetooth UUID.
pub const fn uuid_from_u16(value: u16) -> Uuid {
    uuid_from_u32(value as u32)
}

/// Expand a 32-bit assigned number to a full Bluetooth UUID.
pub const fn uuid_from_u32(value: u32) -> Uuid {
    with_base(BLUETOOTH_BASE, value)
}

/// Expand a 16-bit shorthand to a SensorTag service or characteristic UUID.
pub(crate) const fn sensor_tag_uuid(value: u16) -> Uuid {
    with_base(SENSOR_TAG_BASE, value as u32)
}

/// Expand a 16-bit shorthand to a Thingy:52 service or characteristic UUID.
pub(crate) const fn thingy52_uuid(value: u16) -> Uuid {
    with_base(THINGY52_BASE, value as u32)
}

/// Expand a 16-bit shorthand to a Stollmann serial transport UUID.
pub(crate) const fn stollmann_uuid(value: u16) -> Uuid {
    with_base(STOLLMANN_BASE, value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bluetooth_base() {
        assert_eq!(
            uuid_from_u16(0x180f).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid_from_u32(0x11223344).to_string(),
            "11223344-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn sensor_tag_base() {
        assert_eq!(
            sensor_tag_uuid(0xaa40).to_string(),
            "f000aa40-0451-4000-b000-000000000000"
        );
    }

    #[test]
    fn thingy52_base() {
        assert_eq!(
            thingy52_uuid(0x0201).to_string(),
            "ef680201-9b35-4933-9b10-52ffa9740042"
        );
    }

    #[test]
    fn stollmann_base() {
        assert_eq!(
            stollmann_uuid(0x0001).to_string(),
            "00000001-0000-1000-8000-008025000000"
        );
    }
}
