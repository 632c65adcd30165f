//! Weight measurement service of the Xiaomi Mi Smart Scale.

use bitflags::bitflags;

use crate::bleuuid::uuid_from_u16;
use crate::device::{
    AddressType, Service, ServiceCharacteristic, ServiceType, Trigger, TriggerCondition,
};
use crate::registry::ServiceEntry;
use crate::{check_length, DecodeError};

bitflags! {
    /// Flags of the weight measurement characteristic. The scale uses two
    /// of the reserved bits to report measurement progress.
    pub struct WeightFlags: u8 {
        const IMPERIAL = 0x01;
        const TIMESTAMP = 0x02;
        const USER_ID = 0x04;
        const BMI = 0x08;
        const RESERVED_1 = 0x10;
        const RESERVED_2 = 0x20;
        const RESERVED_3 = 0x40;
        const RESERVED_4 = 0x80;
    }
}

/// Weight measurement data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightData {
    /// Weight scale flags value.
    pub flags: WeightFlags,
    /// Weight in kilograms.
    pub weight: f64,
    /// Whether the weight has stabilized.
    pub stabilized: bool,
    /// Whether the load has been removed from the scale.
    pub load_removed: bool,
}

pub(crate) fn service_entry(service_type: ServiceType) -> Option<ServiceEntry> {
    match service_type {
        ServiceType::WeightMeasurement => Some(ServiceEntry {
            service: Service::Characteristic(ServiceCharacteristic {
                uuid: uuid_from_u16(0x181d),
                uuid_data: uuid_from_u16(0x2a9d),
                size: 9,
            }),
            trigger: Some(Trigger {
                condition: TriggerCondition::OnChange,
                operand: None,
            }),
            address_type: AddressType::Public,
        }),
        _ => None,
    }
}

pub(crate) fn decode_weight(data: &[u8]) -> Result<WeightData, DecodeError> {
    check_length(data, 9)?;
    let flags = WeightFlags::from_bits_truncate(data[0]);
    let weight = f64::from(u16::from_le_bytes([data[1], data[2]])) * 0.005;
    Ok(WeightData {
        flags,
        weight,
        stabilized: flags.contains(WeightFlags::RESERVED_2),
        load_removed: flags.contains(WeightFlags::RESERVED_4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_measurement() {
        let data = decode_weight(b"\x22\x90\x0a\x00\x00\x00\x00\x00\x00").unwrap();
        assert_eq!(data.flags, WeightFlags::TIMESTAMP | WeightFlags::RESERVED_2);
        assert!((data.weight - 13.52).abs() < 1e-9, "{}", data.weight);
        assert!(data.stabilized);
        assert!(!data.load_removed);
    }

    #[test]
    fn load_removed() {
        let data = decode_weight(b"\xa2\x90\x0a\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(data.stabilized);
        assert!(data.load_removed);
    }

    #[test]
    fn short_data() {
        assert_eq!(
            decode_weight(b"\x22\x90"),
            Err(DecodeError::WrongLength {
                length: 2,
                expected_length: 9
            })
        );
    }
}
