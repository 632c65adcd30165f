//! Texas Instruments SensorTag sensors.
//!
//! The sensors do not implement the Bluetooth Environmental Sensing
//! profile; each one exposes its own data, configuration and trigger
//! characteristics. The trigger characteristic takes the read period as a
//! single byte counting hundredths of a second.
//!
//! Sensor identifiers are documented in the CC2541DK and CC2650STK user
//! guides.

use std::convert::TryFrom;
use std::time::Duration;

use crate::bleuuid::{sensor_tag_uuid, uuid_from_u16};
use crate::device::{
    AddressType, DeviceDescriptor, Service, ServiceCharacteristic, ServiceEnvSensing, ServiceType,
    Trigger, TriggerCondition,
};
use crate::devio::write_config;
use crate::registry::ServiceEntry;
use crate::session::Session;
use crate::{check_length, DecodeError, Error};

const HDC1000_HUMIDITY: f64 = 65536.0 / 100.0;
const MPU9250_ACCEL_2G: f64 = 32768.0 / 2.0;

const CONFIG_ON: &[u8] = &[0x01];
const CONFIG_OFF: &[u8] = &[0x00];
// all accelerometer axes on, with wake on motion
const ACCEL_CONFIG_ON: &[u8] = &[0xb8, 0x00];
const ACCEL_CONFIG_OFF: &[u8] = &[0x00, 0x00];

pub(crate) fn service_entry(service_type: ServiceType) -> Option<ServiceEntry> {
    let env_sensing = |service: u16,
                       data: u16,
                       size: usize,
                       conf: u16,
                       trigger: u16,
                       config_on: &'static [u8],
                       config_off: &'static [u8]| {
        Service::EnvSensing(ServiceEnvSensing {
            characteristic: ServiceCharacteristic {
                uuid: sensor_tag_uuid(service),
                uuid_data: sensor_tag_uuid(data),
                size,
            },
            uuid_conf: sensor_tag_uuid(conf),
            uuid_trigger: sensor_tag_uuid(trigger),
            config_on,
            config_off,
            interval: Duration::from_secs(1),
        })
    };
    let entry = |service, trigger| ServiceEntry {
        service,
        trigger,
        address_type: AddressType::Public,
    };
    match service_type {
        ServiceType::Temperature => Some(entry(
            env_sensing(0xaa00, 0xaa01, 4, 0xaa02, 0xaa03, CONFIG_ON, CONFIG_OFF),
            None,
        )),
        ServiceType::Humidity => Some(entry(
            env_sensing(0xaa20, 0xaa21, 4, 0xaa22, 0xaa23, CONFIG_ON, CONFIG_OFF),
            None,
        )),
        ServiceType::Pressure => Some(entry(
            env_sensing(0xaa40, 0xaa41, 6, 0xaa42, 0xaa44, CONFIG_ON, CONFIG_OFF),
            None,
        )),
        ServiceType::Light => Some(entry(
            env_sensing(0xaa70, 0xaa71, 2, 0xaa72, 0xaa73, CONFIG_ON, CONFIG_OFF),
            None,
        )),
        ServiceType::Accelerometer => Some(entry(
            env_sensing(
                0xaa80,
                0xaa81,
                18,
                0xaa82,
                0xaa83,
                ACCEL_CONFIG_ON,
                ACCEL_CONFIG_OFF,
            ),
            Some(Trigger {
                condition: TriggerCondition::FixedTime,
                operand: Some(Duration::from_millis(100)),
            }),
        )),
        ServiceType::Button => Some(entry(
            Service::Characteristic(ServiceCharacteristic {
                uuid: uuid_from_u16(0xffe0),
                uuid_data: uuid_from_u16(0xffe1),
                size: 1,
            }),
            Some(Trigger {
                condition: TriggerCondition::OnChange,
                operand: None,
            }),
        )),
        _ => None,
    }
}

pub(crate) fn decode_temperature(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 4)?;
    Ok(f64::from(u16::from_le_bytes([data[2], data[3]])) / 128.0)
}

pub(crate) fn decode_humidity(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 4)?;
    Ok(f64::from(u16::from_le_bytes([data[2], data[3]])) / HDC1000_HUMIDITY)
}

pub(crate) fn decode_pressure(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 6)?;
    Ok(f64::from(u32::from_le_bytes([data[3], data[4], data[5], 0])))
}

/// Convert light sensor data to a lux value.
pub(crate) fn decode_light(data: &[u8]) -> Result<f64, DecodeError> {
    check_length(data, 2)?;
    let value = u16::from_le_bytes([data[0], data[1]]);
    let mantissa = f64::from(value & 0x0fff) / 100.0;
    let exponent = (value & 0xf000) >> 12;
    Ok(mantissa * f64::from(2u32 << exponent))
}

/// Convert accelerometer data into `(x, y, z)` values in g.
pub(crate) fn decode_accelerometer(data: &[u8]) -> Result<(f64, f64, f64), DecodeError> {
    check_length(data, 18)?;
    // gyroscope: data[..6], magnetometer: data[12..]
    let x = i16::from_le_bytes([data[6], data[7]]);
    let y = i16::from_le_bytes([data[8], data[9]]);
    let z = i16::from_le_bytes([data[10], data[11]]);
    Ok((
        f64::from(x) / MPU9250_ACCEL_2G,
        f64::from(y) / MPU9250_ACCEL_2G,
        f64::from(z) / MPU9250_ACCEL_2G,
    ))
}

/// Encode a sensor read period as the single trigger byte, counting
/// hundredths of a second.
pub(crate) fn encode_trigger(interval: Duration) -> Result<u8, Error> {
    let value = interval.as_millis() / 10;
    u8::try_from(value).map_err(|_| {
        Error::InvalidConfiguration(format!("sensor interval {:?} out of range", interval))
    })
}

pub(crate) async fn enable(
    session: &Session,
    descriptor: &DeviceDescriptor,
    service: &ServiceEnvSensing,
) -> Result<(), Error> {
    let bus = session.bus();
    let mac = descriptor.mac();
    bus.ensure_characteristic_paths(
        mac,
        &[
            service.characteristic.uuid_data,
            service.uuid_conf,
            service.uuid_trigger,
        ],
    )
    .await?;

    write_config(session, mac, service.uuid_conf, service.config_on).await?;

    let interval = descriptor
        .trigger()
        .and_then(|trigger| trigger.operand)
        .unwrap_or(service.interval);
    let value = encode_trigger(interval)?;
    write_config(session, mac, service.uuid_trigger, &[value]).await?;
    log::info!("interval for {} is set", descriptor);

    if descriptor.trigger().is_some() {
        let path = bus
            .characteristic_path(mac, service.characteristic.uuid_data)
            .await?;
        bus.notify_start(&path).await?;
        log::info!("notifications enabled for {}", path);
    }
    Ok(())
}

pub(crate) async fn disable(
    session: &Session,
    descriptor: &DeviceDescriptor,
    service: &ServiceEnvSensing,
) {
    let bus = session.bus();
    let mac = descriptor.mac();
    if descriptor.trigger().is_some() {
        match bus
            .characteristic_path(mac, service.characteristic.uuid_data)
            .await
        {
            Ok(path) => bus.notify_stop(&path).await,
            Err(err) => log::warn!("cannot stop notifications for {}: {}", descriptor, err),
        }
    }
    // the device may already be gone
    if let Err(err) = write_config(session, mac, service.uuid_conf, service.config_off).await {
        log::warn!("cannot disable {}: {}", descriptor, err);
    } else {
        log::info!("{} disabled", descriptor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature() {
        assert_eq!(decode_temperature(b"\x00\x00\x40\x08").unwrap(), 16.5);
    }

    #[test]
    fn humidity() {
        // raw value 32768 is 50%
        let value = decode_humidity(b"\x00\x00\x00\x80").unwrap();
        assert!((value - 50.0).abs() < 1e-9, "{}", value);
    }

    #[test]
    fn pressure() {
        assert_eq!(decode_pressure(b"\x00\x00\x00\xd4\x84\x01").unwrap(), 99540.0);
    }

    #[test]
    fn light() {
        assert_eq!(decode_light(b"\xe8\x03").unwrap(), 20.0);
    }

    #[test]
    fn accelerometer() {
        let mut data = [0u8; 18];
        data[6..8].copy_from_slice(&0x4000i16.to_le_bytes());
        data[8..10].copy_from_slice(&(-0x4000i16).to_le_bytes());
        let (x, y, z) = decode_accelerometer(&data).unwrap();
        assert_eq!(x, 1.0);
        assert_eq!(y, -1.0);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn short_data() {
        assert_eq!(
            decode_temperature(b"\x00\x00"),
            Err(DecodeError::WrongLength {
                length: 2,
                expected_length: 4
            })
        );
    }

    #[test]
    fn trigger_one_second() {
        assert_eq!(encode_trigger(Duration::from_secs(1)).unwrap(), 0x64);
    }

    #[test]
    fn trigger_bounds() {
        assert_eq!(encode_trigger(Duration::from_millis(100)).unwrap(), 10);
        assert_eq!(encode_trigger(Duration::from_millis(2550)).unwrap(), 255);
        assert!(encode_trigger(Duration::from_millis(2560)).is_err());
    }
}
