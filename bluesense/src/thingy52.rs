//! Nordic Thingy:52 sensors.
//!
//! All sensors of the weather service are notifying and share a single
//! configuration characteristic holding the read intervals of every
//! sensor, the gas sensor mode and the colour sensor LED calibration.
//! The session keeps one cached configuration per device address; enabling
//! a sensor folds its trigger period into the cached configuration and
//! writes the whole blob back.

use std::time::Duration;

use crate::bleuuid::thingy52_uuid;
use crate::device::{
    AddressType, ConfigEntry, DeviceDescriptor, LightColor, Service, ServiceCharacteristic,
    ServiceSharedConfig, ServiceType, Trigger, TriggerCondition,
};
use crate::devio::write_config;
use crate::registry::ServiceEntry;
use crate::session::Session;
use crate::{check_length, DecodeError, Error};

const LIGHT_MAX: f64 = 0xffff as f64;

/// Configuration of the weather service sensors, written as little-endian
/// `u16` intervals in milliseconds followed by the gas mode byte and the
/// RGB calibration bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Thingy52Config {
    /// temperature sensor data read interval
    pub temperature: Duration,
    /// pressure sensor data read interval
    pub pressure: Duration,
    /// humidity sensor data read interval
    pub humidity: Duration,
    /// colour sensor data read interval
    pub color: Duration,
    /// gas sensor mode (1 - 1s, 2 - 10s, 3 - 60s)
    pub gas_mode: u8,
    /// colour sensor LED calibration
    pub led: [u8; 3],
}

impl Default for Thingy52Config {
    fn default() -> Self {
        Self {
            temperature: Duration::from_secs(1),
            pressure: Duration::from_secs(1),
            humidity: Duration::from_secs(1),
            color: Duration::from_secs(1),
            gas_mode: 1,
            led: [0, 255, 0],
        }
    }
}

impl Thingy52Config {
    pub(crate) fn set(&mut self, entry: ConfigEntry, interval: Duration) {
        match entry {
            ConfigEntry::Temperature => self.temperature = interval,
            ConfigEntry::Pressure => self.pressure = interval,
            ConfigEntry::Humidity => self.humidity = interval,
            ConfigEntry::Color => self.color = interval,
        }
    }

    pub(crate) fn encode(&self) -> [u8; 12] {
        fn to_ms(interval: Duration) -> u16 {
            interval.as_millis().min(u128::from(u16::MAX)) as u16
        }
        let mut data = [0; 12];
        data[0..2].copy_from_slice(&to_ms(self.temperature).to_le_bytes());
        data[2..4].copy_from_slice(&to_ms(self.pressure).to_le_bytes());
        data[4..6].copy_from_slice(&to_ms(self.humidity).to_le_bytes());
        data[6..8].copy_from_slice(&to_ms(self.color).to_le_bytes());
        data[8] = self.gas_mode;
        data[9..12].copy_from_slice(&self.led);
        data
    }
}

pub(crate) fn service_entry(service_type: ServiceType) -> Option<ServiceEntry> {
    let weather = |data: u16, size: usize, entry: ConfigEntry| {
        Service::SharedConfig(ServiceSharedConfig {
            characteristic: ServiceCharacteristic {
                uuid: thingy52_uuid(0x0200),
                uuid_data: thingy52_uuid(data),
                size,
            },
            uuid_conf: thingy52_uuid(0x0206),
            entry,
        })
    };
    let registered = |service| ServiceEntry {
        service,
        trigger: Some(Trigger {
            condition: TriggerCondition::FixedTime,
            operand: Some(Duration::from_secs(1)),
        }),
        address_type: AddressType::Random,
    };
    match service_type {
        ServiceType::Temperature => Some(registered(weather(0x0201, 2, ConfigEntry::Temperature))),
        ServiceType::Pressure => Some(registered(weather(0x0202, 5, ConfigEntry::Pressure))),
        ServiceType::Humidity => Some(registered(weather(0x0203, 1, ConfigEntry::Humidity))),
        ServiceType::LightRgb => Some(registered(weather(0x0205, 8, ConfigEntry::Color))),
        ServiceType::Button => Some(registered(Service::Characteristic(ServiceCharacteristic {
            uuid: thingy52_uuid(0x0300),
            uuid_data: thingy52_uuid(0x0302),
            size: 1,
        }))),
        _ => None,
    }
}

pub(crate) fn decode_temperature(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 2)?;
    Ok(f64::from(data[0]) + f64::from(data[1]) / 100.0)
}

pub(crate) fn decode_pressure(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 5)?;
    let whole = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    Ok(f64::from(whole) * 100.0 + f64::from(data[4]))
}

pub(crate) fn decode_humidity(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 1)?;
    Ok(f64::from(data[0]))
}

/// Convert data of the BH1745 light sensor to a light colour value.
pub(crate) fn decode_light(data: &[u8]) -> Result<LightColor, DecodeError> {
    check_length(data, 8)?;
    let channel = |index: usize| {
        f64::from(u16::from_le_bytes([data[index], data[index + 1]])) / LIGHT_MAX
    };
    Ok(LightColor {
        red: channel(0),
        blue: channel(2),
        green: channel(4),
        clear: channel(6),
    })
}

pub(crate) async fn enable(
    session: &Session,
    descriptor: &DeviceDescriptor,
    service: &ServiceSharedConfig,
) -> Result<(), Error> {
    let bus = session.bus();
    let mac = descriptor.mac();
    bus.ensure_characteristic_paths(mac, &[service.characteristic.uuid_data, service.uuid_conf])
        .await?;

    let interval = descriptor.trigger().and_then(|trigger| trigger.operand);
    let data = session.shared_config_bytes(mac, service.entry, interval);
    write_config(session, mac, service.uuid_conf, &data).await?;

    let path = bus
        .characteristic_path(mac, service.characteristic.uuid_data)
        .await?;
    bus.notify_start(&path).await?;
    log::info!("notifications enabled for {}", path);
    Ok(())
}

pub(crate) async fn disable(
    session: &Session,
    descriptor: &DeviceDescriptor,
    service: &ServiceSharedConfig,
) {
    let bus = session.bus();
    match bus
        .characteristic_path(descriptor.mac(), service.characteristic.uuid_data)
        .await
    {
        Ok(path) => bus.notify_stop(&path).await,
        Err(err) => log::warn!("cannot stop notifications for {}: {}", descriptor, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        assert_eq!(
            Thingy52Config::default().encode(),
            [0xe8, 0x03, 0xe8, 0x03, 0xe8, 0x03, 0xe8, 0x03, 0x01, 0x00, 0xff, 0x00]
        );
    }

    #[test]
    fn config_last_write_wins() {
        let mut config = Thingy52Config::default();
        config.set(ConfigEntry::Pressure, Duration::from_millis(500));
        config.set(ConfigEntry::Temperature, Duration::from_secs(2));
        config.set(ConfigEntry::Pressure, Duration::from_millis(250));
        assert_eq!(
            config.encode(),
            [0xd0, 0x07, 0xfa, 0x00, 0xe8, 0x03, 0xe8, 0x03, 0x01, 0x00, 0xff, 0x00]
        );
    }

    #[test]
    fn temperature() {
        assert_eq!(decode_temperature(&[21, 25]).unwrap(), 21.25);
    }

    #[test]
    fn pressure() {
        assert_eq!(decode_pressure(&[0xe2, 0x03, 0x00, 0x00, 0x2a]).unwrap(), 99442.0);
    }

    #[test]
    fn humidity() {
        assert_eq!(decode_humidity(&[56]).unwrap(), 56.0);
    }

    #[test]
    fn light() {
        let color = decode_light(&[0xff, 0xff, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00]).unwrap();
        assert_eq!(color.red, 1.0);
        assert_eq!(color.blue, 0.0);
        assert_eq!(color.green, 1.0);
        assert_eq!(color.clear, 0.0);
    }

    #[test]
    fn short_data() {
        assert!(decode_light(&[0x00]).is_err());
    }
}
