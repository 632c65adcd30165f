//! Serial device access over a Bluetooth Smart connection, implementing
//! the Stollmann (Telit) terminal I/O protocol: data and credit
//! characteristics in each direction, where every credit allows the peer
//! to send one fragment of up to 20 bytes.
//!
//! Tested with the HeinrichsWeikamp OSTC dive computers.

use std::cmp::min;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::bleuuid::{stollmann_uuid, uuid_from_u16};
use crate::device::{AddressType, DeviceDescriptor, Service, ServiceSerial, ServiceType};
use crate::macaddress::MacAddress;
use crate::registry::ServiceEntry;
use crate::session::Session;
use crate::Error;

pub(crate) const UUID_RX_UART: Uuid = stollmann_uuid(0x0001);
pub(crate) const UUID_TX_UART: Uuid = stollmann_uuid(0x0002);
pub(crate) const UUID_RX_CREDIT: Uuid = stollmann_uuid(0x0003);
pub(crate) const UUID_TX_CREDIT: Uuid = stollmann_uuid(0x0004);

/// Maximum payload of a single fragment.
const FRAGMENT_SIZE: usize = 20;

/// Credits granted to the remote end when the local grant runs out.
const INITIAL_RX_CREDITS: u8 = 0x20;

/// Buffered input and the number of fragments the remote end may still
/// send before a new credit grant is due.
#[derive(Debug, Default)]
pub(crate) struct SerialState {
    buffer: VecDeque<u8>,
    rx_credits: u32,
}

pub(crate) fn service_entry(service_type: ServiceType) -> Option<ServiceEntry> {
    match service_type {
        ServiceType::Serial => Some(ServiceEntry {
            service: Service::Serial(ServiceSerial {
                uuid: uuid_from_u16(0xfefb),
            }),
            trigger: None,
            address_type: AddressType::Public,
        }),
        _ => None,
    }
}

/// Number of credits required to receive `n` bytes. Credits are a single
/// byte, so a grant never exceeds 255.
pub(crate) fn credits_for(n: usize) -> u8 {
    min(255, (n + FRAGMENT_SIZE - 1) / FRAGMENT_SIZE) as u8
}

pub(crate) async fn enable(session: &Session, descriptor: &DeviceDescriptor) -> Result<(), Error> {
    let bus = session.bus();
    let mac = descriptor.mac();

    session.with_serial_state(mac, |state| *state = SerialState::default());

    bus.ensure_characteristic_paths(
        mac,
        &[UUID_TX_UART, UUID_RX_UART, UUID_TX_CREDIT, UUID_RX_CREDIT],
    )
    .await?;

    let tx_credit = bus.characteristic_path(mac, UUID_TX_CREDIT).await?;
    bus.notify_start(&tx_credit).await?;
    let tx_uart = bus.characteristic_path(mac, UUID_TX_UART).await?;
    bus.notify_start(&tx_uart).await?;

    grant_rx_credits(session, mac, INITIAL_RX_CREDITS).await?;
    // wait for the first credit grant from the remote end
    take_tx_credit(session, mac).await?;
    Ok(())
}

pub(crate) async fn disable(session: &Session, descriptor: &DeviceDescriptor) {
    let bus = session.bus();
    let mac = descriptor.mac();
    for uuid in &[UUID_TX_CREDIT, UUID_TX_UART] {
        match bus.characteristic_path(mac, *uuid).await {
            Ok(path) => bus.notify_stop(&path).await,
            Err(err) => log::warn!("cannot stop notifications for {}: {}", descriptor, err),
        }
    }
}

/// Read exactly `n` bytes. Surplus bytes of the last fragment are kept for
/// the next call.
pub(crate) async fn read(
    session: &Session,
    descriptor: &DeviceDescriptor,
    n: usize,
) -> Result<Vec<u8>, Error> {
    let bus = session.bus();
    let mac = descriptor.mac();
    let tx_uart = bus.characteristic_path(mac, UUID_TX_UART).await?;

    let mut data: Vec<u8> =
        session.with_serial_state(mac, |state| state.buffer.drain(..).collect());
    while data.len() < n {
        let missing = n - data.len();
        if session.with_serial_state(mac, |state| state.rx_credits) < 1 {
            grant_rx_credits(session, mac, credits_for(missing)).await?;
        }
        let fragment = bus.characteristic_value(&tx_uart).await?;
        let credits = session.with_serial_state(mac, |state| {
            state.rx_credits = state.rx_credits.saturating_sub(1);
            state.rx_credits
        });
        data.extend_from_slice(&fragment);
        log::debug!(
            "bytes read {}, fragment size {}, rx credits {}",
            data.len(),
            fragment.len(),
            credits
        );
    }

    let surplus = data.split_off(n);
    session.with_serial_state(mac, |state| state.buffer.extend(surplus));
    Ok(data)
}

/// Write a single fragment of at most 20 bytes.
pub(crate) async fn write(
    session: &Session,
    descriptor: &DeviceDescriptor,
    data: &[u8],
) -> Result<(), Error> {
    if data.len() > FRAGMENT_SIZE {
        return Err(Error::DataWrite(format!(
            "serial writes are limited to {} bytes",
            FRAGMENT_SIZE
        )));
    }
    let bus = session.bus();
    let mac = descriptor.mac();

    if session.with_serial_state(mac, |state| state.rx_credits) < 1 {
        grant_rx_credits(session, mac, INITIAL_RX_CREDITS).await?;
    }
    take_tx_credit(session, mac).await?;

    let rx_uart = bus.characteristic_path(mac, UUID_RX_UART).await?;
    bus.write_characteristic(&rx_uart, data).await
}

async fn grant_rx_credits(session: &Session, mac: MacAddress, count: u8) -> Result<(), Error> {
    let bus = session.bus();
    let rx_credit = bus.characteristic_path(mac, UUID_RX_CREDIT).await?;
    bus.write_characteristic(&rx_credit, &[count]).await?;
    let total = session.with_serial_state(mac, |state| {
        state.rx_credits += u32::from(count);
        state.rx_credits
    });
    log::debug!("rx credits: {}", total);
    Ok(())
}

/// Consume one credit notification from the remote end; immediate when one
/// is already queued.
async fn take_tx_credit(session: &Session, mac: MacAddress) -> Result<(), Error> {
    let bus = session.bus();
    let tx_credit = bus.characteristic_path(mac, UUID_TX_CREDIT).await?;
    let value = bus.characteristic_value(&tx_credit).await?;
    log::debug!("got tx credits: {:?}", value.first());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_for_fragments() {
        assert_eq!(credits_for(1), 1);
        assert_eq!(credits_for(20), 1);
        assert_eq!(credits_for(21), 2);
        assert_eq!(credits_for(255 * 20), 255);
        assert_eq!(credits_for(10_000), 255);
    }

    #[test]
    fn state_starts_empty() {
        let state = SerialState::default();
        assert!(state.buffer.is_empty());
        assert_eq!(state.rx_credits, 0);
    }
}
