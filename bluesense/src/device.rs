//! Bluetooth device descriptors and device object constructors.
//!
//! Descriptors are immutable values; `set_interval`, `set_trigger` and
//! `set_address_type` return new descriptors instead of mutating. The
//! factory constructors (`temperature`, `pressure`, ...) look the service
//! up in the registry for the given make, and return a triggered device
//! when the registry entry carries a default trigger. It is not possible
//! to turn a triggered device back into a non-triggered one.

use bitflags::bitflags;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::macaddress::MacAddress;
use crate::registry;
use crate::weight::{decode_weight, WeightData};
use crate::{battery, sensortag, thingy52};
use crate::{DecodeError, Error};

/// MAC address type of a Bluetooth device.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AddressType {
    /// Public address.
    Public,
    /// Random address.
    Random,
}

impl AddressType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Random => "random",
        }
    }
}

impl Display for AddressType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "random" => Ok(Self::Random),
            _ => Err(Error::InvalidConfiguration(format!(
                "invalid address type {}",
                s
            ))),
        }
    }
}

/// Vendor or product family of a Bluetooth device, determining which
/// service descriptor and decoder a generic service type maps to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Make {
    Standard,
    SensorTag,
    Thingy52,
    Ostc,
    MiSmartScale,
}

/// Generic Bluetooth service type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    Accelerometer,
    Button,
    BatteryLevel,
    Humidity,
    Light,
    LightRgb,
    Pressure,
    Serial,
    Temperature,
    WeightMeasurement,
}

/// Condition which makes a sensor publish a new value.
///
/// The values are the condition identifiers of the Bluetooth Environmental
/// Sensing trigger descriptor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TriggerCondition {
    FixedTime = 0x01,
    OnChange = 0x04,
}

/// Trigger information of an Environmental Sensing style device.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Trigger {
    pub condition: TriggerCondition,
    /// Time period for `FixedTime` triggers.
    pub operand: Option<Duration>,
}

/// Field of the Thingy:52 shared sensor configuration updated by a trigger.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConfigEntry {
    Temperature,
    Pressure,
    Humidity,
    Color,
}

/// Light value with RGB colour information, each channel in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightColor {
    pub red: f64,
    pub blue: f64,
    pub green: f64,
    pub clear: f64,
}

bitflags! {
    /// State of the buttons found on various Bluetooth devices. Devices
    /// with a single button report it as `USER`.
    pub struct Button: u8 {
        const USER = 0x01;
        const POWER = 0x02;
        const REED_RELAY = 0x04;
    }
}

/// Service whose value is read as a typed property of a D-Bus interface,
/// e.g. `Percentage` of `org.bluez.Battery1`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceInterface {
    pub uuid: Uuid,
    pub interface: &'static str,
    pub property: &'static str,
    /// D-Bus type signature of the property value.
    pub signature: &'static str,
}

/// Service reading fixed-size data from a GATT characteristic.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceCharacteristic {
    pub uuid: Uuid,
    /// UUID of the characteristic to read data from.
    pub uuid_data: Uuid,
    /// Length of the data received on read.
    pub size: usize,
}

/// Environmental-sensing style service with per-sensor configuration and
/// trigger characteristics (TI SensorTag family).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceEnvSensing {
    pub characteristic: ServiceCharacteristic,
    pub uuid_conf: Uuid,
    pub uuid_trigger: Uuid,
    pub config_on: &'static [u8],
    pub config_off: &'static [u8],
    /// Sensor read period used when no trigger is set.
    pub interval: Duration,
}

/// Service configured through a single configuration blob shared by all
/// sensors of the device (Nordic Thingy:52 family).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceSharedConfig {
    pub characteristic: ServiceCharacteristic,
    pub uuid_conf: Uuid,
    pub entry: ConfigEntry,
}

/// Credit-gated serial transport service.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceSerial {
    pub uuid: Uuid,
}

/// Bluetooth service descriptor.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Service {
    Interface(ServiceInterface),
    Characteristic(ServiceCharacteristic),
    EnvSensing(ServiceEnvSensing),
    SharedConfig(ServiceSharedConfig),
    Serial(ServiceSerial),
}

impl Service {
    /// UUID of the Bluetooth service.
    pub fn uuid(&self) -> Uuid {
        match self {
            Service::Interface(service) => service.uuid,
            Service::Characteristic(service) => service.uuid,
            Service::EnvSensing(service) => service.characteristic.uuid,
            Service::SharedConfig(service) => service.characteristic.uuid,
            Service::Serial(service) => service.uuid,
        }
    }

    /// UUID of the data characteristic, for services which have one.
    pub(crate) fn data_uuid(&self) -> Option<Uuid> {
        match self {
            Service::Characteristic(service) => Some(service.uuid_data),
            Service::EnvSensing(service) => Some(service.characteristic.uuid_data),
            Service::SharedConfig(service) => Some(service.characteristic.uuid_data),
            Service::Interface(_) | Service::Serial(_) => None,
        }
    }
}

/// Everything the connection manager needs to know about a device: which
/// service it exposes, where it lives and how it is triggered.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DeviceDescriptor {
    service: Service,
    mac: MacAddress,
    address_type: AddressType,
    trigger: Option<Trigger>,
}

impl DeviceDescriptor {
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }
}

impl Display for DeviceDescriptor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.mac, self.service.uuid())
    }
}

/// Function decoding the raw service data into a value.
pub type Decode<T> = fn(&[u8]) -> Result<T, DecodeError>;

/// Bluetooth device descriptor together with the decoder producing typed
/// values from raw service data.
pub struct Device<T> {
    descriptor: DeviceDescriptor,
    decode: Decode<T>,
}

impl<T> Device<T> {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn mac(&self) -> MacAddress {
        self.descriptor.mac
    }

    pub(crate) fn decode(&self, data: &[u8]) -> Result<T, DecodeError> {
        (self.decode)(data)
    }
}

impl<T> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            decode: self.decode,
        }
    }
}

impl<T> Debug for Device<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> Display for Device<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&self.descriptor, f)
    }
}

/// Create a device for a Bluetooth service with a public address.
pub fn create_device<T>(service: Service, mac: MacAddress, decode: Decode<T>) -> Device<T> {
    Device {
        descriptor: DeviceDescriptor {
            service,
            mac,
            address_type: AddressType::Public,
            trigger: None,
        },
        decode,
    }
}

/// Make the sensor publish a new value at a fixed time interval.
///
/// This is equivalent to `set_trigger(device, TriggerCondition::FixedTime,
/// Some(interval))`.
pub fn set_interval<T>(device: Device<T>, interval: Duration) -> Device<T> {
    set_trigger(device, TriggerCondition::FixedTime, Some(interval))
}

/// Set the trigger of an Environmental Sensing style device.
pub fn set_trigger<T>(
    mut device: Device<T>,
    condition: TriggerCondition,
    operand: Option<Duration>,
) -> Device<T> {
    device.descriptor.trigger = Some(Trigger { condition, operand });
    device
}

/// Set the connection address type of a device.
pub fn set_address_type<T>(mut device: Device<T>, address_type: AddressType) -> Device<T> {
    device.descriptor.address_type = address_type;
    device
}

fn build<T>(make: Make, service_type: ServiceType, mac: MacAddress, decode: Decode<T>) -> Result<Device<T>, Error> {
    let entry = registry::lookup(make, service_type).ok_or_else(|| unknown(make, service_type))?;
    Ok(Device {
        descriptor: DeviceDescriptor {
            service: entry.service,
            mac,
            address_type: entry.address_type,
            trigger: entry.trigger,
        },
        decode,
    })
}

fn unknown(make: Make, service_type: ServiceType) -> Error {
    Error::InvalidConfiguration(format!(
        "no {:?} service known for {:?} devices",
        service_type, make
    ))
}

/// Temperature sensor, in degrees Celsius.
pub fn temperature(mac: MacAddress, make: Make) -> Result<Device<f64>, Error> {
    let decode = match make {
        Make::SensorTag => sensortag::decode_temperature as Decode<f64>,
        Make::Thingy52 => thingy52::decode_temperature,
        _ => return Err(unknown(make, ServiceType::Temperature)),
    };
    build(make, ServiceType::Temperature, mac, decode)
}

/// Pressure sensor, in pascals.
pub fn pressure(mac: MacAddress, make: Make) -> Result<Device<f64>, Error> {
    let decode = match make {
        Make::SensorTag => sensortag::decode_pressure as Decode<f64>,
        Make::Thingy52 => thingy52::decode_pressure,
        _ => return Err(unknown(make, ServiceType::Pressure)),
    };
    build(make, ServiceType::Pressure, mac, decode)
}

/// Relative humidity sensor, in percent.
pub fn humidity(mac: MacAddress, make: Make) -> Result<Device<f64>, Error> {
    let decode = match make {
        Make::SensorTag => sensortag::decode_humidity as Decode<f64>,
        Make::Thingy52 => thingy52::decode_humidity,
        _ => return Err(unknown(make, ServiceType::Humidity)),
    };
    build(make, ServiceType::Humidity, mac, decode)
}

/// Light sensor, in lux.
pub fn light(mac: MacAddress, make: Make) -> Result<Device<f64>, Error> {
    let decode = match make {
        Make::SensorTag => sensortag::decode_light as Decode<f64>,
        _ => return Err(unknown(make, ServiceType::Light)),
    };
    build(make, ServiceType::Light, mac, decode)
}

/// Light sensor with colour information.
pub fn light_rgb(mac: MacAddress, make: Make) -> Result<Device<LightColor>, Error> {
    let decode = match make {
        Make::Thingy52 => thingy52::decode_light as Decode<LightColor>,
        _ => return Err(unknown(make, ServiceType::LightRgb)),
    };
    build(make, ServiceType::LightRgb, mac, decode)
}

/// Accelerometer, publishing `(x, y, z)` values in g. Works with a trigger
/// only.
pub fn accelerometer(mac: MacAddress, make: Make) -> Result<Device<(f64, f64, f64)>, Error> {
    let decode = match make {
        Make::SensorTag => sensortag::decode_accelerometer as Decode<(f64, f64, f64)>,
        _ => return Err(unknown(make, ServiceType::Accelerometer)),
    };
    build(make, ServiceType::Accelerometer, mac, decode)
}

/// Device button state. Works with a trigger only.
pub fn button(mac: MacAddress, make: Make) -> Result<Device<Button>, Error> {
    let decode = match make {
        Make::SensorTag | Make::Thingy52 => decode_button as Decode<Button>,
        _ => return Err(unknown(make, ServiceType::Button)),
    };
    build(make, ServiceType::Button, mac, decode)
}

/// Serial device with a credit-gated byte channel. Read with
/// [`Session::read_serial`](crate::Session::read_serial).
pub fn serial(mac: MacAddress, make: Make) -> Result<Device<Vec<u8>>, Error> {
    match make {
        Make::Ostc => build(make, ServiceType::Serial, mac, decode_bytes),
        _ => Err(unknown(make, ServiceType::Serial)),
    }
}

/// Weight measurement. Works with a trigger only.
pub fn weight(mac: MacAddress, make: Make) -> Result<Device<WeightData>, Error> {
    let decode = match make {
        Make::MiSmartScale => decode_weight as Decode<WeightData>,
        _ => return Err(unknown(make, ServiceType::WeightMeasurement)),
    };
    build(make, ServiceType::WeightMeasurement, mac, decode)
}

/// The current charge level of the device battery, in percent.
pub fn battery_level(mac: MacAddress, make: Make) -> Result<Device<u8>, Error> {
    let decode = match make {
        Make::Standard => battery::decode_battery_level as Decode<u8>,
        _ => return Err(unknown(make, ServiceType::BatteryLevel)),
    };
    build(make, ServiceType::BatteryLevel, mac, decode)
}

fn decode_button(data: &[u8]) -> Result<Button, DecodeError> {
    crate::check_length(data, 1)?;
    Ok(Button::from_bits_truncate(data[0]))
}

fn decode_bytes(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "00:11:22:33:44:55".parse().unwrap()
    }

    #[test]
    fn temperature_sensor_tag_has_no_trigger() {
        let device = temperature(mac(), Make::SensorTag).unwrap();
        assert_eq!(device.descriptor().trigger(), None);
        assert_eq!(device.descriptor().address_type(), AddressType::Public);
    }

    #[test]
    fn temperature_thingy52_is_triggered() {
        let device = temperature(mac(), Make::Thingy52).unwrap();
        assert_eq!(
            device.descriptor().trigger(),
            Some(&Trigger {
                condition: TriggerCondition::FixedTime,
                operand: Some(Duration::from_secs(1)),
            })
        );
        assert_eq!(device.descriptor().address_type(), AddressType::Random);
    }

    #[test]
    fn accelerometer_is_triggered_by_default() {
        let device = accelerometer(mac(), Make::SensorTag).unwrap();
        assert_eq!(
            device.descriptor().trigger(),
            Some(&Trigger {
                condition: TriggerCondition::FixedTime,
                operand: Some(Duration::from_millis(100)),
            })
        );
    }

    #[test]
    fn button_is_triggered_on_change() {
        let device = button(mac(), Make::SensorTag).unwrap();
        assert_eq!(
            device.descriptor().trigger().map(|t| t.condition),
            Some(TriggerCondition::OnChange)
        );
    }

    #[test]
    fn battery_level_reads_bus_property() {
        let device = battery_level(mac(), Make::Standard).unwrap();
        match device.descriptor().service() {
            Service::Interface(service) => {
                assert_eq!(service.interface, "org.bluez.Battery1");
                assert_eq!(service.property, "Percentage");
            }
            other => panic!("unexpected service: {:?}", other),
        }
        assert!(device.descriptor().trigger().is_some());
    }

    #[test]
    fn unknown_make_is_rejected() {
        assert!(matches!(
            temperature(mac(), Make::Standard),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            serial(mac(), Make::SensorTag),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn set_interval_sets_fixed_time_trigger() {
        let device = temperature(mac(), Make::SensorTag).unwrap();
        let device = set_interval(device, Duration::from_millis(500));
        assert_eq!(
            device.descriptor().trigger(),
            Some(&Trigger {
                condition: TriggerCondition::FixedTime,
                operand: Some(Duration::from_millis(500)),
            })
        );
    }

    #[test]
    fn set_address_type_replaces_address_type() {
        let device = temperature(mac(), Make::SensorTag).unwrap();
        let device = set_address_type(device, AddressType::Random);
        assert_eq!(device.descriptor().address_type(), AddressType::Random);
    }

    #[test]
    fn decode_button_state() {
        assert_eq!(decode_button(&[0x01]).unwrap(), Button::USER);
        assert_eq!(
            decode_button(&[0x05]).unwrap(),
            Button::USER | Button::REED_RELAY
        );
        assert_eq!(decode_button(&[0x00]).unwrap(), Button::empty());
        assert!(decode_button(&[]).is_err());
    }
}
