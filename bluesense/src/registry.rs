//! Table of known services per device make.
//!
//! Each device family contributes its entries; the table is fixed at build
//! time and read-only.

use crate::device::{AddressType, Make, Service, ServiceType, Trigger};
use crate::{battery, sensortag, serial, thingy52, weight};

/// A registered service: the service descriptor, the default trigger (if
/// the service only works triggered) and the address type the device
/// family connects with.
#[derive(Clone, Debug)]
pub(crate) struct ServiceEntry {
    pub service: Service,
    pub trigger: Option<Trigger>,
    pub address_type: AddressType,
}

pub(crate) fn lookup(make: Make, service_type: ServiceType) -> Option<ServiceEntry> {
    match make {
        Make::Standard => battery::service_entry(service_type),
        Make::SensorTag => sensortag::service_entry(service_type),
        Make::Thingy52 => thingy52::service_entry(service_type),
        Make::Ostc => serial::service_entry(service_type),
        Make::MiSmartScale => weight::service_entry(service_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_services() {
        let known = [
            (Make::Standard, ServiceType::BatteryLevel),
            (Make::SensorTag, ServiceType::Temperature),
            (Make::SensorTag, ServiceType::Pressure),
            (Make::SensorTag, ServiceType::Humidity),
            (Make::SensorTag, ServiceType::Light),
            (Make::SensorTag, ServiceType::Accelerometer),
            (Make::SensorTag, ServiceType::Button),
            (Make::Thingy52, ServiceType::Temperature),
            (Make::Thingy52, ServiceType::Pressure),
            (Make::Thingy52, ServiceType::Humidity),
            (Make::Thingy52, ServiceType::LightRgb),
            (Make::Thingy52, ServiceType::Button),
            (Make::Ostc, ServiceType::Serial),
            (Make::MiSmartScale, ServiceType::WeightMeasurement),
        ];
        for (make, service_type) in &known {
            assert!(
                lookup(*make, *service_type).is_some(),
                "missing entry for {:?}/{:?}",
                make,
                service_type
            );
        }
    }

    #[test]
    fn unknown_services() {
        assert!(lookup(Make::Standard, ServiceType::Temperature).is_none());
        assert!(lookup(Make::SensorTag, ServiceType::Serial).is_none());
        assert!(lookup(Make::Thingy52, ServiceType::Light).is_none());
        assert!(lookup(Make::MiSmartScale, ServiceType::BatteryLevel).is_none());
    }

    #[test]
    fn thingy52_connects_with_random_address() {
        let entry = lookup(Make::Thingy52, ServiceType::Temperature).unwrap();
        assert_eq!(entry.address_type, AddressType::Random);
        let entry = lookup(Make::SensorTag, ServiceType::Temperature).unwrap();
        assert_eq!(entry.address_type, AddressType::Public);
    }
}
