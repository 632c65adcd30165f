//! Typed façade over the D-Bus interface of BlueZ: object paths,
//! characteristic discovery, property reads, notification control, and the
//! agent and profile registrations the connection manager needs.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use bluesense_generated::{
    OrgBluezAdapter1, OrgBluezAgentManager1, OrgBluezDevice1, OrgBluezGattCharacteristic1,
    OrgBluezProfileManager1, ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME,
};
use dbus::arg::{PropMap, Variant};
use dbus::channel::{MatchingReceiver, Sender, Token};
use dbus::message::MatchRule;
use dbus::nonblock::stdintf::org_freedesktop_dbus::Properties;
use dbus::nonblock::{Proxy, SyncConnection};
use dbus::{Message, Path};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::device::AddressType;
use crate::introspect::IntrospectParse;
use crate::macaddress::MacAddress;
use crate::notify::{PropertyMonitors, PropertyValue};
use crate::{
    Error, SpawnError, CHARACTERISTIC_LOOKUP_DELAY, CHARACTERISTIC_LOOKUP_RETRIES,
    CONNECT_CALL_TIMEOUT, DBUS_METHOD_CALL_TIMEOUT,
};

const BLUEZ_BUS_NAME: &str = "org.bluez";
const BLUEZ_ROOT_PATH: &str = "/org/bluez";

/// Object path of the headless pairing agent exported by this process.
const AGENT_PATH: &str = "/org/bluesense/agent";
const AGENT_CAPABILITY: &str = "NoInputNoOutput";

/// Prefix of the profile objects registered for managed service UUIDs.
const PROFILE_PATH_BASE: &str = "/org/bluesense/profile";

/// One D-Bus connection to BlueZ, bound to a single Bluetooth adapter such
/// as `hci0`.
pub(crate) struct Bus {
    connection: Arc<SyncConnection>,
    interface: String,
    monitors: PropertyMonitors,
    characteristics: Mutex<HashMap<(MacAddress, Uuid), Path<'static>>>,
    receive_token: Mutex<Option<Token>>,
}

impl Bus {
    /// Open the D-Bus system bus.
    ///
    /// Returns a tuple of (join handle, Self). If the join handle ever
    /// completes then the connection to D-Bus was lost.
    pub async fn open(
        interface: &str,
    ) -> Result<(impl Future<Output = Result<(), SpawnError>>, Self), Error> {
        // Connect to the D-Bus system bus (this is blocking, unfortunately).
        let (dbus_resource, connection) = dbus_tokio::connection::new_system_sync()?;
        // The resource is a task that should be spawned onto a tokio compatible
        // reactor ASAP. If the resource ever finishes, you lost connection to D-Bus.
        let dbus_handle = tokio::spawn(async {
            let err = dbus_resource.await;
            Err(SpawnError::DbusConnectionLost(err))
        });
        let bus = Bus {
            monitors: PropertyMonitors::new(connection.clone()),
            connection,
            interface: interface.to_string(),
            characteristics: Mutex::new(HashMap::new()),
            receive_token: Mutex::new(None),
        };
        Ok((dbus_handle.map(|res| Ok(res??)), bus))
    }

    pub fn adapter_path(&self) -> Path<'static> {
        format!("{}/{}", BLUEZ_ROOT_PATH, self.interface).into()
    }

    pub fn device_path(&self, mac: MacAddress) -> Path<'static> {
        format!(
            "{}/{}/dev_{}",
            BLUEZ_ROOT_PATH,
            self.interface,
            mac.path_segment()
        )
        .into()
    }

    fn proxy(&self, path: Path<'static>) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new(
            BLUEZ_BUS_NAME,
            path,
            DBUS_METHOD_CALL_TIMEOUT,
            self.connection.clone(),
        )
    }

    fn adapter(&self) -> Proxy<'static, Arc<SyncConnection>> {
        self.proxy(self.adapter_path())
    }

    fn device(&self, mac: MacAddress) -> Proxy<'static, Arc<SyncConnection>> {
        self.proxy(self.device_path(mac))
    }

    /// Create a connection to the device, selecting the given address type.
    pub async fn connect_device(
        &self,
        mac: MacAddress,
        address_type: AddressType,
    ) -> Result<(), Error> {
        let mut properties: PropMap = HashMap::new();
        properties.insert("Address".to_string(), Variant(Box::new(mac.to_string())));
        properties.insert(
            "AddressType".to_string(),
            Variant(Box::new(address_type.to_string())),
        );
        // connecting takes longer than an ordinary bus call
        let adapter = Proxy::new(
            BLUEZ_BUS_NAME,
            self.adapter_path(),
            CONNECT_CALL_TIMEOUT,
            self.connection.clone(),
        );
        let path = adapter.connect_device(properties).await?;
        log::debug!("device {} connected at {}", mac, path);
        Ok(())
    }

    pub async fn disconnect_device(&self, mac: MacAddress) -> Result<(), Error> {
        self.device(mac).disconnect().await?;
        Ok(())
    }

    pub async fn remove_device(&self, mac: MacAddress) -> Result<(), Error> {
        self.adapter().remove_device(self.device_path(mac)).await?;
        Ok(())
    }

    pub async fn set_trusted(&self, mac: MacAddress) -> Result<(), Error> {
        self.device(mac).set_trusted(true).await?;
        Ok(())
    }

    pub async fn device_name(&self, mac: MacAddress) -> Result<String, Error> {
        Ok(OrgBluezDevice1::name(&self.device(mac)).await?)
    }

    /// Walk the GATT object tree of a device looking for a characteristic
    /// with the given UUID.
    async fn find_characteristic(
        &self,
        mac: MacAddress,
        uuid: Uuid,
    ) -> Result<Option<Path<'static>>, Error> {
        let device_path = self.device_path(mac);
        let device_node = self.device(mac).introspect_parse().await?;
        for service_node in device_node.nodes {
            // Service paths are always of the form
            // /org/bluez/{hci0,hci1,...}/dev_XX_XX_XX_XX_XX_XX/serviceXXXX
            let service_name = match &service_node.name {
                Some(name) if name.starts_with("service") => name,
                _ => continue,
            };
            let service_path: Path<'static> =
                format!("{}/{}", device_path, service_name).into();
            let service_tree = self.proxy(service_path.clone()).introspect_parse().await?;
            for characteristic_node in service_tree.nodes {
                let characteristic_name = match &characteristic_node.name {
                    Some(name) if name.starts_with("char") => name,
                    _ => continue,
                };
                let characteristic_path: Path<'static> =
                    format!("{}/{}", service_path, characteristic_name).into();
                let found = self.proxy(characteristic_path.clone()).uuid().await?;
                if Uuid::parse_str(&found)? == uuid {
                    return Ok(Some(characteristic_path));
                }
            }
        }
        Ok(None)
    }

    /// Resolve the object path of a GATT characteristic by UUID. Paths are
    /// cached per `(mac, uuid)` once found.
    pub async fn characteristic_path(
        &self,
        mac: MacAddress,
        uuid: Uuid,
    ) -> Result<Path<'static>, Error> {
        if let Some(path) = self.characteristics.lock().unwrap().get(&(mac, uuid)) {
            return Ok(path.clone());
        }
        match self.find_characteristic(mac, uuid).await? {
            Some(path) => {
                self.characteristics
                    .lock()
                    .unwrap()
                    .insert((mac, uuid), path.clone());
                Ok(path)
            }
            None => Err(Error::CharacteristicNotFound { mac, uuid }),
        }
    }

    /// Make sure a characteristic path can be resolved, retrying while BlueZ
    /// is still populating the GATT tree after a reconnect.
    pub async fn ensure_characteristic_path(
        &self,
        mac: MacAddress,
        uuid: Uuid,
    ) -> Result<(), Error> {
        if self
            .characteristics
            .lock()
            .unwrap()
            .contains_key(&(mac, uuid))
        {
            return Ok(());
        }
        // bounded to CHARACTERISTIC_LOOKUP_RETRIES lookups, one delay apart
        let policy = ExponentialBackoff {
            initial_interval: CHARACTERISTIC_LOOKUP_DELAY,
            max_interval: CHARACTERISTIC_LOOKUP_DELAY,
            multiplier: 1.0,
            randomization_factor: 0.0,
            max_elapsed_time: Some(CHARACTERISTIC_LOOKUP_DELAY * (CHARACTERISTIC_LOOKUP_RETRIES - 1)),
            ..ExponentialBackoff::default()
        };
        retry(policy, || async {
            match self.find_characteristic(mac, uuid).await {
                Ok(Some(path)) => {
                    self.characteristics
                        .lock()
                        .unwrap()
                        .insert((mac, uuid), path);
                    Ok(())
                }
                Ok(None) => {
                    log::warn!("characteristic path not found for {}/{}", mac, uuid);
                    Err(backoff::Error::Transient(Error::CharacteristicNotFound {
                        mac,
                        uuid,
                    }))
                }
                Err(err) => Err(backoff::Error::Permanent(err)),
            }
        })
        .await
    }

    pub async fn ensure_characteristic_paths(
        &self,
        mac: MacAddress,
        uuids: &[Uuid],
    ) -> Result<(), Error> {
        for uuid in uuids {
            self.ensure_characteristic_path(mac, *uuid).await?;
        }
        Ok(())
    }

    /// One-shot read of a GATT characteristic value.
    pub async fn read_characteristic(&self, path: &Path<'static>) -> Result<Vec<u8>, Error> {
        self.proxy(path.clone())
            .read_value(HashMap::new())
            .await
            .map_err(|err| Error::DataRead(err.to_string()))
    }

    /// Write a GATT characteristic value.
    pub async fn write_characteristic(
        &self,
        path: &Path<'static>,
        value: &[u8],
    ) -> Result<(), Error> {
        self.proxy(path.clone())
            .write_value(value.to_vec(), HashMap::new())
            .await
            .map_err(|err| Error::DataWrite(err.to_string()))
    }

    /// Start notifications on a characteristic and route notified values
    /// into a queue. A failure to start unwinds the queue subscription.
    pub async fn notify_start(&self, path: &Path<'static>) -> Result<(), Error> {
        let created = self
            .monitors
            .start(path.clone(), ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME, "Value")
            .await?;
        if !created {
            // already notifying
            return Ok(());
        }
        if let Err(err) = self.proxy(path.clone()).start_notify().await {
            log::warn!("cannot start notifications for {}: {}", path, err);
            self.monitors
                .stop(path, ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME)
                .await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Stop notifications on a characteristic. Best effort; the device may
    /// already be gone.
    pub async fn notify_stop(&self, path: &Path<'static>) {
        if let Err(err) = self.proxy(path.clone()).stop_notify().await {
            log::warn!("cannot stop notifications for {}: {}", path, err);
        }
        self.monitors
            .stop(path, ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME)
            .await;
    }

    /// Await the next notified value of a characteristic.
    pub async fn characteristic_value(&self, path: &Path<'static>) -> Result<Vec<u8>, Error> {
        match self
            .monitors
            .get(path, ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME, "Value")
            .await?
        {
            PropertyValue::Bytes(data) => Ok(data),
            other => Err(Error::DataRead(format!(
                "unexpected value notified for {}: {:?}",
                path, other
            ))),
        }
    }

    /// Number of notified values waiting to be consumed for a characteristic.
    pub async fn characteristic_backlog(&self, path: &Path<'static>) -> usize {
        self.monitors
            .size(path, ORG_BLUEZ_GATT_CHARACTERISTIC1_NAME, "Value")
            .await
    }

    pub async fn device_property_start(
        &self,
        mac: MacAddress,
        interface: &str,
        property: &str,
    ) -> Result<(), Error> {
        self.monitors
            .start(self.device_path(mac), interface, property)
            .await?;
        Ok(())
    }

    /// Await the next change of a monitored device property.
    pub async fn device_property_get(
        &self,
        mac: MacAddress,
        interface: &str,
        property: &str,
    ) -> Result<PropertyValue, Error> {
        self.monitors
            .get(&self.device_path(mac), interface, property)
            .await
    }

    pub async fn device_property_stop(&self, mac: MacAddress, interface: &str) {
        self.monitors.stop(&self.device_path(mac), interface).await;
    }

    /// One-shot typed read of a device property exposed on some interface,
    /// e.g. `Percentage` of `org.bluez.Battery1`.
    pub async fn device_property_value(
        &self,
        mac: MacAddress,
        interface: &str,
        property: &str,
        signature: &str,
    ) -> Result<PropertyValue, Error> {
        let device = self.device(mac);
        let value = match signature {
            "y" => PropertyValue::UInt(u64::from(
                Properties::get::<u8>(&device, interface, property).await?,
            )),
            "q" => PropertyValue::UInt(u64::from(
                Properties::get::<u16>(&device, interface, property).await?,
            )),
            "u" => PropertyValue::UInt(u64::from(
                Properties::get::<u32>(&device, interface, property).await?,
            )),
            "t" => PropertyValue::UInt(Properties::get::<u64>(&device, interface, property).await?),
            "b" => PropertyValue::Bool(Properties::get::<bool>(&device, interface, property).await?),
            "s" => {
                PropertyValue::Text(Properties::get::<String>(&device, interface, property).await?)
            }
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unsupported property type '{}'",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Register the headless pairing agent and make it the default agent.
    pub async fn register_agent(&self) -> Result<(), Error> {
        let token = self.connection.start_receive(
            MatchRule::new_method_call(),
            Box::new(|message, connection| {
                reply_to_call(message, connection);
                true
            }),
        );
        *self.receive_token.lock().unwrap() = Some(token);

        let bluez = self.proxy(BLUEZ_ROOT_PATH.into());
        bluez
            .register_agent(AGENT_PATH.into(), AGENT_CAPABILITY)
            .await?;
        bluez.request_default_agent(AGENT_PATH.into()).await?;
        log::info!("bluetooth agent registered");
        Ok(())
    }

    pub async fn unregister_agent(&self) -> Result<(), Error> {
        let bluez = self.proxy(BLUEZ_ROOT_PATH.into());
        let result = bluez.unregister_agent(AGENT_PATH.into()).await;
        if let Some(token) = self.receive_token.lock().unwrap().take() {
            self.connection.stop_receive(token);
        }
        Ok(result?)
    }

    /// Register a client profile for each managed service UUID, so BlueZ
    /// keeps an interest in the devices carrying them. Returns the profile
    /// object paths to unregister on teardown.
    pub async fn register_profiles(&self, uuids: &[Uuid]) -> Result<Vec<Path<'static>>, Error> {
        let bluez = self.proxy(BLUEZ_ROOT_PATH.into());
        let mut profiles = Vec::with_capacity(uuids.len());
        for (index, uuid) in uuids.iter().enumerate() {
            let path: Path<'static> = format!("{}{}", PROFILE_PATH_BASE, index).into();
            let mut options: PropMap = HashMap::new();
            options.insert(
                "Role".to_string(),
                Variant(Box::new("client".to_string())),
            );
            options.insert("AutoConnect".to_string(), Variant(Box::new(true)));
            bluez
                .register_profile(path.clone(), &uuid.to_string(), options)
                .await?;
            profiles.push(path);
        }
        log::info!("registered {} service profiles", profiles.len());
        Ok(profiles)
    }

    pub async fn unregister_profiles(&self, profiles: &[Path<'static>]) -> Result<(), Error> {
        let bluez = self.proxy(BLUEZ_ROOT_PATH.into());
        for path in profiles {
            bluez.unregister_profile(path.clone()).await?;
        }
        Ok(())
    }
}

/// Answer a method call directed at one of the objects this process
/// exports. Pairing requests are confirmed without user interaction.
fn reply_to_call(message: Message, connection: &SyncConnection) {
    let path = message.path().map(|p| p.to_string()).unwrap_or_default();
    let member = message.member().map(|m| m.to_string()).unwrap_or_default();
    log::debug!("method call {} on {}", member, path);
    if message.get_no_reply() {
        return;
    }
    let reply = if path == AGENT_PATH {
        match member.as_str() {
            "RequestPinCode" => message.method_return().append1("000000"),
            "RequestPasskey" => message.method_return().append1(0u32),
            _ => message.method_return(),
        }
    } else if path.starts_with(PROFILE_PATH_BASE) {
        message.method_return()
    } else if let Some(reply) = dbus::channel::default_reply(&message) {
        reply
    } else {
        return;
    };
    let _ = connection.send(reply);
}
