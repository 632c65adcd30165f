//! Generic operations for Bluetooth devices: `read`, `write`, `enable` and
//! `disable`, dispatched on the service variant of the device descriptor.

use futures::{stream, Stream};
use uuid::Uuid;

use crate::bus::Bus;
use crate::device::{Device, DeviceDescriptor, Service};
use crate::macaddress::MacAddress;
use crate::session::Session;
use crate::{sensortag, serial, thingy52, Error};

impl Session {
    /// Read the next value from a device.
    ///
    /// The read waits until the device is connected and enabled. It fails
    /// with [`Error::Disconnected`] when the connection drops while the
    /// read is in flight; the caller may retry to continue reading after
    /// the device reconnects.
    pub async fn read<T>(&self, device: &Device<T>) -> Result<T, Error> {
        let descriptor = device.descriptor();
        let data = self
            .run_io(descriptor.mac(), read_raw(self, descriptor))
            .await?;
        Ok(device.decode(&data)?)
    }

    /// Read exactly `n` bytes from a serial device.
    pub async fn read_serial<T>(&self, device: &Device<T>, n: usize) -> Result<Vec<u8>, Error> {
        let descriptor = device.descriptor();
        match descriptor.service() {
            Service::Serial(_) => {
                self.run_io(descriptor.mac(), serial::read(self, descriptor, n))
                    .await
            }
            _ => Err(Error::InvalidConfiguration(format!(
                "{} is not a serial device",
                descriptor
            ))),
        }
    }

    /// Write data to a device.
    pub async fn write<T>(&self, device: &Device<T>, data: &[u8]) -> Result<(), Error> {
        let descriptor = device.descriptor();
        match descriptor.service() {
            Service::Serial(_) => {
                self.run_io(descriptor.mac(), serial::write(self, descriptor, data))
                    .await
            }
            service => match service.data_uuid() {
                Some(uuid) => {
                    self.run_io(
                        descriptor.mac(),
                        write_config(self, descriptor.mac(), uuid, data),
                    )
                    .await
                }
                None => Err(Error::InvalidConfiguration(format!(
                    "cannot write to {}",
                    descriptor
                ))),
            },
        }
    }

    /// Read values from a device for as long as the session is active,
    /// resuming over reconnections.
    pub fn read_all<'a, T>(&'a self, device: &'a Device<T>) -> impl Stream<Item = T> + 'a {
        stream::unfold((), move |()| async move {
            loop {
                if !self.is_active() {
                    return None;
                }
                match self.read(device).await {
                    Ok(value) => return Some((value, ())),
                    Err(Error::Disconnected(mac)) => {
                        // the next read blocks until the device is enabled again
                        log::info!("device {} disconnected while reading", mac);
                    }
                    Err(Error::Stopped) | Err(Error::NotRunning) => return None,
                    Err(err) => {
                        log::warn!("reading {} failed: {}", device, err);
                        return None;
                    }
                }
            }
        })
    }

    /// Enable and configure a device. Called by the connection manager on
    /// every (re)connection.
    pub async fn enable<T>(&self, device: &Device<T>) -> Result<(), Error> {
        self.enable_descriptor(device.descriptor()).await
    }

    /// Disable a device and release the resources held for it. Best effort;
    /// called on disconnection, when the device may already be gone.
    pub async fn disable<T>(&self, device: &Device<T>) -> Result<(), Error> {
        self.disable_descriptor(device.descriptor()).await;
        Ok(())
    }

    pub(crate) async fn enable_descriptor(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<(), Error> {
        let bus = self.bus();
        let mac = descriptor.mac();
        match descriptor.service() {
            Service::Characteristic(service) => {
                bus.ensure_characteristic_path(mac, service.uuid_data).await?;
                if descriptor.trigger().is_some() {
                    let path = bus.characteristic_path(mac, service.uuid_data).await?;
                    bus.notify_start(&path).await?;
                    log::info!("notifications enabled for {}", path);
                }
                Ok(())
            }
            Service::Interface(service) => {
                bus.device_property_start(mac, service.interface, service.property)
                    .await
            }
            Service::EnvSensing(service) => sensortag::enable(self, descriptor, service).await,
            Service::SharedConfig(service) => thingy52::enable(self, descriptor, service).await,
            Service::Serial(_) => serial::enable(self, descriptor).await,
        }
    }

    pub(crate) async fn disable_descriptor(&self, descriptor: &DeviceDescriptor) {
        let bus = self.bus();
        let mac = descriptor.mac();
        match descriptor.service() {
            Service::Characteristic(service) => {
                if descriptor.trigger().is_some() {
                    match bus.characteristic_path(mac, service.uuid_data).await {
                        Ok(path) => bus.notify_stop(&path).await,
                        Err(err) => {
                            log::warn!("cannot stop notifications for {}: {}", descriptor, err)
                        }
                    }
                }
            }
            Service::Interface(service) => bus.device_property_stop(mac, service.interface).await,
            Service::EnvSensing(service) => sensortag::disable(self, descriptor, service).await,
            Service::SharedConfig(service) => thingy52::disable(self, descriptor, service).await,
            Service::Serial(_) => serial::disable(self, descriptor).await,
        }
    }
}

async fn read_raw(session: &Session, descriptor: &DeviceDescriptor) -> Result<Vec<u8>, Error> {
    let bus = session.bus();
    let mac = descriptor.mac();
    let notified = descriptor.trigger().is_some();
    match descriptor.service() {
        Service::Interface(service) => {
            let value = if notified {
                bus.device_property_get(mac, service.interface, service.property)
                    .await?
            } else {
                bus.device_property_value(
                    mac,
                    service.interface,
                    service.property,
                    service.signature,
                )
                .await?
            };
            Ok(value.into_bytes(service.signature)?)
        }
        Service::Characteristic(service) => {
            characteristic_data(bus, mac, service.uuid_data, notified).await
        }
        Service::EnvSensing(service) => {
            characteristic_data(bus, mac, service.characteristic.uuid_data, notified).await
        }
        Service::SharedConfig(service) => {
            characteristic_data(bus, mac, service.characteristic.uuid_data, notified).await
        }
        Service::Serial(_) => Err(Error::InvalidConfiguration(format!(
            "{} is read with read_serial",
            descriptor
        ))),
    }
}

/// Next notified value of the data characteristic, or a one-shot read for
/// devices without a trigger.
async fn characteristic_data(
    bus: &Bus,
    mac: MacAddress,
    uuid: Uuid,
    notified: bool,
) -> Result<Vec<u8>, Error> {
    let path = bus.characteristic_path(mac, uuid).await?;
    if notified {
        bus.characteristic_value(&path).await
    } else {
        bus.read_characteristic(&path).await
    }
}

/// Write data to a configuration or data characteristic of a device.
pub(crate) async fn write_config(
    session: &Session,
    mac: MacAddress,
    uuid: Uuid,
    data: &[u8],
) -> Result<(), Error> {
    let bus = session.bus();
    let path = bus.characteristic_path(mac, uuid).await?;
    bus.write_characteristic(&path, data).await
}
