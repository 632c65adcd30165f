//! Connection management for multiple Bluetooth devices.
//!
//! Starting a session:
//!
//! 1. Register the Bluetooth agent.
//! 2. Register a profile per service UUID of the managed devices, so the
//!    daemon keeps an interest in them.
//! 3. For each device address
//!    1. Remove the device preemptively to allow a new connection.
//!    2. Connect with the `ConnectDevice` method of the adapter. On
//!       failure, go back to the previous step.
//!    3. Mark the device as trusted.
//!    4. Wait for `ServicesResolved` changes: enable the devices of the
//!       address when it turns true, disable them when it turns false.
//!
//! On session close each device is disconnected and removed, and the agent
//! and the profiles are unregistered.
//!
//! NOTE: On devices like a Raspberry Pi, discovery may still be required
//! for a long-running device to reconnect.

use itertools::Itertools;
use std::collections::HashMap;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use bluesense_generated::ORG_BLUEZ_DEVICE1_NAME;

use crate::bus::Bus;
use crate::device::{AddressType, DeviceDescriptor};
use crate::macaddress::MacAddress;
use crate::session::{CancelReason, Session};
use crate::{Error, CONNECT_RETRY_DELAY, ENABLE_TIMEOUT};

/// Start a session managing the connections of the given devices on a
/// Bluetooth adapter, e.g. `hci0`.
///
/// The session keeps reconnecting its devices until it is stopped. Stop it
/// with [`Session::close`], or await [`Session::closed`] to keep a program
/// running for as long as the session lives.
pub async fn connect<I>(devices: I, interface: &str) -> Result<Session, Error>
where
    I: IntoIterator<Item = DeviceDescriptor>,
{
    let (dbus_handle, bus) = Bus::open(interface).await?;

    let by_mac: HashMap<MacAddress, Vec<DeviceDescriptor>> = devices
        .into_iter()
        .map(|device| (device.mac(), device))
        .into_group_map();

    bus.register_agent().await?;

    let uuids: Vec<Uuid> = by_mac
        .values()
        .flatten()
        .map(|device| device.service().uuid())
        .unique()
        .collect();
    let profiles = bus.register_profiles(&uuids).await?;

    let session = Session::new(bus, by_mac.keys().copied(), profiles);

    // the session cannot outlive the bus connection
    let watchdog = session.clone();
    tokio::spawn(async move {
        if let Err(err) = dbus_handle.await {
            log::error!("{}", err);
        }
        watchdog.stop();
    });

    for (mac, devices) in by_mac {
        let task = tokio::spawn(manage_connection(session.clone(), mac, devices));
        session.add_task(task);
    }
    Ok(session)
}

/// Manage the Bluetooth connection for the devices of one address.
async fn manage_connection(session: Session, mac: MacAddress, devices: Vec<DeviceDescriptor>) {
    let result = manage(&session, mac, &devices).await;
    teardown(&session, mac).await;
    if let Err(err) = result {
        log::error!("connection task for {} failed: {}", mac, err);
        if session.is_active() {
            session.stop();
        }
    }
}

async fn manage(
    session: &Session,
    mac: MacAddress,
    devices: &[DeviceDescriptor],
) -> Result<(), Error> {
    let bus = session.bus();
    let address_type = connection_address_type(devices);

    // monitor `ServicesResolved` before connecting, so no change is missed
    bus.device_property_start(mac, ORG_BLUEZ_DEVICE1_NAME, "ServicesResolved")
        .await?;

    if establish(session, mac, address_type).await? {
        supervise(session, mac, devices).await?;
    }
    Ok(())
}

/// Create the connection. Returns false when the session stopped before a
/// connection could be created.
async fn establish(
    session: &Session,
    mac: MacAddress,
    address_type: AddressType,
) -> Result<bool, Error> {
    let bus = session.bus();
    while session.is_active() {
        // remove the device first; a stale entry in the daemon registry
        // blocks the new connection
        if let Err(err) = bus.remove_device(mac).await {
            log::debug!("removal of connection failed for device {}: {}", mac, err);
        }

        log::info!(
            "connect device {} via controller {}, address type {}",
            mac,
            bus.adapter_path(),
            address_type
        );
        match bus.connect_device(mac, address_type).await {
            Ok(()) => {}
            Err(Error::Dbus(ref err)) if already_exists(err) => {
                log::debug!("connection for device {} exists already", mac);
            }
            Err(err) => {
                if !session.is_active() {
                    break;
                }
                log::info!(
                    "connection for {} failed: {}, sleep for {:?}",
                    mac,
                    err,
                    CONNECT_RETRY_DELAY
                );
                tokio::select! {
                    _ = sleep(CONNECT_RETRY_DELAY) => {}
                    _ = session.closed() => {}
                }
                continue;
            }
        }

        if let Err(err) = bus.set_trusted(mac).await {
            log::warn!("cannot set device {} as trusted: {}", mac, err);
        }
        match bus.device_name(mac).await {
            Ok(name) => log::info!("device {} connected ({})", mac, name),
            Err(_) => log::info!("device {} connected", mac),
        }
        return Ok(true);
    }
    Ok(false)
}

/// Enable or disable the devices of the address when `ServicesResolved`
/// changes.
async fn supervise(
    session: &Session,
    mac: MacAddress,
    devices: &[DeviceDescriptor],
) -> Result<(), Error> {
    let bus = session.bus();
    while session.is_active() {
        log::info!(
            "device {} waiting for services resolved status change",
            mac
        );
        let value = tokio::select! {
            value = bus.device_property_get(mac, ORG_BLUEZ_DEVICE1_NAME, "ServicesResolved") => value?,
            _ = session.closed() => break,
        };
        let resolved = value.as_bool().unwrap_or(false);
        log::info!("device {} services resolved: {}", mac, resolved);

        if resolved {
            if let Err(err) = enable_devices(session, mac, devices).await {
                log::info!(
                    "enabling devices for {} failed, seems to be not connected: {}",
                    mac,
                    err
                );
                // some devices might be partially enabled; they still need
                // to release their resources
                disable_devices(session, mac, devices).await;
            }
        } else {
            disable_devices(session, mac, devices).await;
        }
    }
    Ok(())
}

/// Enable every device of the address and open the connected gate.
///
/// Devices of one address may share configuration characteristics, so they
/// are enabled one at a time.
async fn enable_devices(
    session: &Session,
    mac: MacAddress,
    devices: &[DeviceDescriptor],
) -> Result<(), Error> {
    log::info!("enabling devices: {}", mac);
    for device in devices {
        match timeout(ENABLE_TIMEOUT, session.enable_descriptor(device)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Disconnected(mac)),
        }
    }
    session.set_connected(mac);
    log::info!("enabled devices: {}", mac);
    Ok(())
}

async fn disable_devices(session: &Session, mac: MacAddress, devices: &[DeviceDescriptor]) {
    log::info!("disabling devices: {}", mac);
    // clear the connection gate as soon as possible, to prevent reading
    // from a disabled device
    session.set_disconnected(mac);
    session.cancel_io(mac, CancelReason::ConnectionLost);
    for device in devices {
        session.disable_descriptor(device).await;
    }
    log::info!("disabled devices: {}", mac);
}

async fn teardown(session: &Session, mac: MacAddress) {
    let bus = session.bus();
    bus.device_property_stop(mac, ORG_BLUEZ_DEVICE1_NAME).await;
    match bus.disconnect_device(mac).await {
        Ok(()) => log::info!("device {} disconnected", mac),
        Err(err) => log::warn!("device {} failed to disconnect: {}", mac, err),
    }
    match bus.remove_device(mac).await {
        Ok(()) => log::info!("connection for device {} removed", mac),
        Err(err) => log::warn!("removal of connection failed for device {}: {}", mac, err),
    }
}

fn already_exists(err: &dbus::Error) -> bool {
    err.name() == Some("org.bluez.Error.AlreadyExists") || err.message() == Some("Already Exists")
}

/// Address type to connect with; random wins when the devices of an
/// address disagree.
fn connection_address_type(devices: &[DeviceDescriptor]) -> AddressType {
    let has_random = devices
        .iter()
        .any(|device| device.address_type() == AddressType::Random);
    if has_random {
        AddressType::Random
    } else {
        AddressType::Public
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{set_address_type, temperature, Make};

    fn mac() -> MacAddress {
        "00:11:22:33:44:55".parse().unwrap()
    }

    #[test]
    fn public_when_all_public() {
        let device = temperature(mac(), Make::SensorTag).unwrap();
        let devices = vec![device.descriptor().clone()];
        assert_eq!(connection_address_type(&devices), AddressType::Public);
    }

    #[test]
    fn random_wins() {
        let public = temperature(mac(), Make::SensorTag).unwrap();
        let random = set_address_type(
            crate::device::humidity(mac(), Make::SensorTag).unwrap(),
            AddressType::Random,
        );
        let devices = vec![
            public.descriptor().clone(),
            random.descriptor().clone(),
        ];
        assert_eq!(connection_address_type(&devices), AddressType::Random);
    }
}
