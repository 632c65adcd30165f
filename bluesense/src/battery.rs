//! Battery level as exposed by BlueZ through the `org.bluez.Battery1`
//! interface.

use bluesense_generated::ORG_BLUEZ_BATTERY1_NAME;

use crate::bleuuid::uuid_from_u16;
use crate::device::{AddressType, Service, ServiceInterface, ServiceType, Trigger, TriggerCondition};
use crate::registry::ServiceEntry;
use crate::{check_length, DecodeError};

pub(crate) fn service_entry(service_type: ServiceType) -> Option<ServiceEntry> {
    match service_type {
        ServiceType::BatteryLevel => Some(ServiceEntry {
            service: Service::Interface(ServiceInterface {
                uuid: uuid_from_u16(0x180f),
                interface: ORG_BLUEZ_BATTERY1_NAME,
                property: "Percentage",
                signature: "y",
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

pub(crate) fn decode_battery_level(data: &[u8]) -> Result<u8, DecodeError> {
    check_length(data, 1)?;
    Ok(data[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_level() {
        assert_eq!(decode_battery_level(&[83]).unwrap(), 83);
        assert!(decode_battery_level(&[]).is_err());
    }
}
