//! Asynchronous access to Bluetooth Low-Energy devices through BlueZ, the
//! Linux Bluetooth daemon.
//!
//! The crate manages the connections of multiple devices concurrently: a
//! [`Session`] keeps one reconnect loop per device address which removes,
//! connects and trusts the device, waits for its GATT services to be
//! resolved, and enables every sensor of the address. Reads wait for the
//! device to be connected and enabled, so sensors keep delivering data
//! over reconnections.
//!
//! Devices are described by immutable descriptors created with the sensor
//! constructors ([`temperature`], [`pressure`], [`humidity`], [`light`],
//! [`light_rgb`], [`accelerometer`], [`button`], [`serial`], [`weight`],
//! [`battery_level`]) for a given device [`Make`].
//!
//! ```no_run
//! use std::time::Duration;
//! use bluesense::{connect, set_interval, temperature, Make};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bluesense::Error> {
//!     let sensor = set_interval(
//!         temperature("54:6C:0E:00:00:01".parse().unwrap(), Make::SensorTag)?,
//!         Duration::from_secs(1),
//!     );
//!     let session = connect(vec![sensor.descriptor().clone()], "hci0").await?;
//!     for _ in 0..4 {
//!         println!("{}", session.read(&sensor).await?);
//!     }
//!     session.close().await;
//!     Ok(())
//! }
//! ```

mod battery;
mod bleuuid;
mod bus;
mod cm;
mod device;
mod devio;
mod introspect;
mod macaddress;
mod messagestream;
mod notify;
mod registry;
mod sensortag;
mod serial;
mod session;
mod thingy52;
mod weight;

pub use self::bleuuid::{uuid_from_u16, uuid_from_u32};
pub use self::cm::connect;
pub use self::device::{
    accelerometer, battery_level, button, create_device, humidity, light, light_rgb, pressure,
    serial, set_address_type, set_interval, set_trigger, temperature, weight, AddressType, Button,
    ConfigEntry, Decode, Device, DeviceDescriptor, LightColor, Make, Service,
    ServiceCharacteristic, ServiceEnvSensing, ServiceInterface, ServiceSerial, ServiceSharedConfig,
    ServiceType, Trigger, TriggerCondition,
};
pub use self::macaddress::{MacAddress, ParseMacAddressError};
pub use self::session::Session;
pub use self::weight::{WeightData, WeightFlags};

use dbus_tokio::connection::IOResourceError;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

pub(crate) const DBUS_METHOD_CALL_TIMEOUT: Duration = Duration::from_secs(5);
// connecting takes longer than the default bus call timeout allows
pub(crate) const CONNECT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub(crate) const ENABLE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CHARACTERISTIC_LOOKUP_RETRIES: u32 = 5;
pub(crate) const CHARACTERISTIC_LOOKUP_DELAY: Duration = Duration::from_secs(1);

/// An error carrying out a Bluetooth operation.
#[derive(Debug, Error)]
pub enum Error {
    /// There was an error talking to the BlueZ daemon over D-Bus.
    #[error(transparent)]
    Dbus(#[from] dbus::Error),
    /// An operation was attempted outside a running session.
    #[error("Session is not running")]
    NotRunning,
    /// The session stopped while the operation was in flight.
    #[error("Session stopped")]
    Stopped,
    /// The device is not connected, or the connection dropped while the
    /// operation was waiting.
    #[error("Connection to device {0} lost")]
    Disconnected(MacAddress),
    /// The device is not managed by this session.
    #[error("Device {0} is not managed by this session")]
    NotManaged(MacAddress),
    /// A GATT characteristic could not be resolved, even after retrying.
    #[error("Characteristic {uuid} not found for device {mac}")]
    CharacteristicNotFound { mac: MacAddress, uuid: Uuid },
    /// The device descriptor or an operation argument is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Reading from the device failed.
    #[error("Error reading from device: {0}")]
    DataRead(String),
    /// Writing to the device failed.
    #[error("Error writing to device: {0}")]
    DataWrite(String),
    /// The data received from the device could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Error parsing XML for introspection.
    #[error("Error parsing XML for introspection: {0}")]
    XmlParse(#[from] serde_xml_rs::Error),
    /// Error parsing a UUID from a string.
    #[error("Error parsing UUID string: {0}")]
    UuidParse(#[from] uuid::Error),
}

/// An error decoding the raw data received from a device.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("Wrong length {length}, expected {expected_length}")]
    WrongLength {
        length: usize,
        expected_length: usize,
    },
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
}

pub(crate) fn check_length(data: &[u8], expected_length: usize) -> Result<(), DecodeError> {
    if data.len() == expected_length {
        Ok(())
    } else {
        Err(DecodeError::WrongLength {
            length: data.len(),
            expected_length,
        })
    }
}

/// Error type for futures representing tasks spawned by this crate.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("D-Bus connection lost: {0}")]
    DbusConnectionLost(#[source] IOResourceError),
    #[error("Task failed: {0}")]
    Join(#[from] JoinError),
}
