//! Multiplexing of `PropertiesChanged` signals into per-property value
//! queues.
//!
//! For every `(object path, interface)` pair there is at most one D-Bus
//! signal subscription, feeding one queue per registered property name.
//! Values for a property are delivered in arrival order; nothing is implied
//! about ordering between different properties.

use dbus::arg::{cast, ArgType, RefArg, Variant};
use dbus::message::SignalArgs;
use dbus::nonblock::stdintf::org_freedesktop_dbus::PropertiesPropertiesChanged;
use dbus::nonblock::SyncConnection;
use dbus::strings::BusName;
use dbus::{Message, Path};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::messagestream::MessageStream;
use crate::{DecodeError, Error};

const BLUEZ_BUS_NAME: &str = "org.bluez";

/// Each queue holds at most this many undelivered values. The remote side
/// never has more than 255 outstanding notifications in any protocol this
/// crate speaks, so hitting the limit means the consumer is gone.
const QUEUE_LIMIT: usize = 1024;

/// A single property value extracted from a `PropertiesChanged` signal.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PropertyValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
}

impl PropertyValue {
    pub(crate) fn from_variant(value: &Variant<Box<dyn RefArg>>) -> Option<Self> {
        let arg = &value.0;
        match arg.arg_type() {
            ArgType::Boolean => arg.as_i64().map(|v| PropertyValue::Bool(v != 0)),
            ArgType::Byte | ArgType::UInt16 | ArgType::UInt32 | ArgType::UInt64 => {
                arg.as_u64().map(PropertyValue::UInt)
            }
            ArgType::Int16 | ArgType::Int32 | ArgType::Int64 => {
                arg.as_i64().map(PropertyValue::Int)
            }
            ArgType::String => arg.as_str().map(|v| PropertyValue::Text(v.to_owned())),
            ArgType::Array => cast::<Vec<u8>>(&value.0).map(|v| PropertyValue::Bytes(v.clone())),
            _ => None,
        }
    }

    pub(crate) fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Render the value as little-endian bytes of the width implied by the
    /// D-Bus type signature, so property-backed services can share the
    /// `bytes -> T` decoder shape with characteristic-backed ones.
    pub(crate) fn into_bytes(self, signature: &str) -> Result<Vec<u8>, DecodeError> {
        match self {
            PropertyValue::Bytes(data) => Ok(data),
            PropertyValue::Text(text) => Ok(text.into_bytes()),
            PropertyValue::Bool(value) => Ok(vec![value as u8]),
            PropertyValue::UInt(value) => encode_le(value, signature),
            PropertyValue::Int(value) => encode_le(value as u64, signature),
        }
    }
}

fn encode_le(value: u64, signature: &str) -> Result<Vec<u8>, DecodeError> {
    let width = match signature {
        "y" | "b" => 1,
        "n" | "q" => 2,
        "i" | "u" => 4,
        "x" | "t" => 8,
        _ => {
            return Err(DecodeError::UnsupportedValue(format!(
                "cannot render property of type '{}' as bytes",
                signature
            )))
        }
    };
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Extract the changed properties of `interface` from a D-Bus message, if it
/// is a `PropertiesChanged` signal for that interface.
fn property_changes(message: &Message, interface: &str) -> Vec<(String, PropertyValue)> {
    let changed = match PropertiesPropertiesChanged::from_message(message) {
        Some(changed) => changed,
        None => return vec![],
    };
    if changed.interface_name != interface {
        return vec![];
    }
    changed
        .changed_properties
        .iter()
        .filter_map(|(name, value)| match PropertyValue::from_variant(value) {
            Some(value) => Some((name.clone(), value)),
            None => {
                log::warn!("Property {} changed to a value of unsupported type", name);
                None
            }
        })
        .collect()
}

#[derive(Default)]
struct Sink {
    queue: StdMutex<VecDeque<PropertyValue>>,
    ready: Notify,
}

impl Sink {
    fn push(&self, value: PropertyValue) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= QUEUE_LIMIT {
            log::warn!("Property queue overflow, dropping oldest value");
            queue.pop_front();
        }
        queue.push_back(value);
        self.ready.notify_one();
    }

    /// Await the next value. Cancelling the returned future does not consume
    /// a value.
    async fn next(&self) -> PropertyValue {
        loop {
            if let Some(value) = self.queue.lock().unwrap().pop_front() {
                return value;
            }
            self.ready.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[derive(Default)]
struct SinkTable {
    sinks: StdMutex<HashMap<String, Arc<Sink>>>,
}

impl SinkTable {
    fn register(&self, property: &str) {
        self.sinks
            .lock()
            .unwrap()
            .entry(property.to_string())
            .or_default();
    }

    fn get(&self, property: &str) -> Option<Arc<Sink>> {
        self.sinks.lock().unwrap().get(property).cloned()
    }

    fn push(&self, property: &str, value: PropertyValue) {
        if let Some(sink) = self.get(property) {
            sink.push(value);
        }
    }
}

struct Monitor {
    sinks: Arc<SinkTable>,
    task: JoinHandle<()>,
}

/// At most one signal subscription per `(path, interface)` pair, with one
/// value queue per registered property.
pub(crate) struct PropertyMonitors {
    connection: Arc<SyncConnection>,
    monitors: Mutex<HashMap<(Path<'static>, String), Monitor>>,
}

impl PropertyMonitors {
    pub fn new(connection: Arc<SyncConnection>) -> Self {
        Self {
            connection,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Start monitoring a property. Idempotent per property name; returns
    /// whether a new subscription was created for the `(path, interface)`
    /// pair.
    pub async fn start(
        &self,
        path: Path<'static>,
        interface: &str,
        property: &str,
    ) -> Result<bool, Error> {
        let mut monitors = self.monitors.lock().await;
        let key = (path.clone(), interface.to_string());
        if let Some(monitor) = monitors.get(&key) {
            monitor.sinks.register(property);
            return Ok(false);
        }

        let bus_name: BusName = BLUEZ_BUS_NAME.into();
        let rule =
            PropertiesPropertiesChanged::match_rule(Some(&bus_name), Some(&path)).static_clone();
        let msg_match = self.connection.add_match(rule).await?;
        let stream = MessageStream::new(msg_match, self.connection.clone());

        let sinks = Arc::new(SinkTable::default());
        sinks.register(property);
        let task = tokio::spawn(pump(stream, interface.to_string(), sinks.clone()));
        monitors.insert(key, Monitor { sinks, task });
        Ok(true)
    }

    /// Await the next value of a monitored property.
    pub async fn get(
        &self,
        path: &Path<'static>,
        interface: &str,
        property: &str,
    ) -> Result<PropertyValue, Error> {
        let sink = {
            let monitors = self.monitors.lock().await;
            monitors
                .get(&(path.clone(), interface.to_string()))
                .and_then(|monitor| monitor.sinks.get(property))
        };
        match sink {
            Some(sink) => Ok(sink.next().await),
            None => Err(Error::DataRead(format!(
                "property {} of {} is not monitored",
                property, path
            ))),
        }
    }

    /// Number of values queued for a monitored property.
    pub async fn size(&self, path: &Path<'static>, interface: &str, property: &str) -> usize {
        let monitors = self.monitors.lock().await;
        monitors
            .get(&(path.clone(), interface.to_string()))
            .and_then(|monitor| monitor.sinks.get(property))
            .map(|sink| sink.len())
            .unwrap_or(0)
    }

    /// Drop the subscription for a `(path, interface)` pair and all its
    /// property queues.
    pub async fn stop(&self, path: &Path<'static>, interface: &str) {
        let mut monitors = self.monitors.lock().await;
        if let Some(monitor) = monitors.remove(&(path.clone(), interface.to_string())) {
            monitor.task.abort();
        }
    }
}

async fn pump(mut stream: MessageStream, interface: String, sinks: Arc<SinkTable>) {
    while let Some(message) = stream.next().await {
        for (property, value) in property_changes(&message, &interface) {
            log::trace!("{} changed: {:?}", property, value);
            sinks.push(&property, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus::arg::{RefArg, Variant};

    fn properties_changed_message(
        path: &'static str,
        interface: &str,
        property: &str,
        value: Box<dyn RefArg>,
    ) -> Message {
        let mut changed_properties: HashMap<String, Variant<Box<dyn RefArg>>> = HashMap::new();
        changed_properties.insert(property.to_string(), Variant(value));
        let properties_changed = PropertiesPropertiesChanged {
            interface_name: interface.to_string(),
            changed_properties,
            invalidated_properties: vec![],
        };
        properties_changed.to_emit_message(&path.into())
    }

    #[test]
    fn changes_bool() {
        let message = properties_changed_message(
            "/org/bluez/hci0/dev_11_22_33_44_55_66",
            "org.bluez.Device1",
            "ServicesResolved",
            Box::new(true),
        );
        assert_eq!(
            property_changes(&message, "org.bluez.Device1"),
            vec![("ServicesResolved".to_string(), PropertyValue::Bool(true))]
        );
    }

    #[test]
    fn changes_bytes() {
        let message = properties_changed_message(
            "/org/bluez/hci0/dev_11_22_33_44_55_66/service0012/char0034",
            "org.bluez.GattCharacteristic1",
            "Value",
            Box::new(vec![1u8, 2, 3]),
        );
        assert_eq!(
            property_changes(&message, "org.bluez.GattCharacteristic1"),
            vec![(
                "Value".to_string(),
                PropertyValue::Bytes(vec![1u8, 2, 3])
            )]
        );
    }

    #[test]
    fn changes_other_interface_ignored() {
        let message = properties_changed_message(
            "/org/bluez/hci0/dev_11_22_33_44_55_66",
            "org.bluez.Device1",
            "Connected",
            Box::new(false),
        );
        assert_eq!(property_changes(&message, "org.bluez.Battery1"), vec![]);
    }

    #[test]
    fn changes_percentage() {
        let message = properties_changed_message(
            "/org/bluez/hci0/dev_11_22_33_44_55_66",
            "org.bluez.Battery1",
            "Percentage",
            Box::new(83u8),
        );
        assert_eq!(
            property_changes(&message, "org.bluez.Battery1"),
            vec![("Percentage".to_string(), PropertyValue::UInt(83))]
        );
    }

    #[test]
    fn value_into_bytes() {
        assert_eq!(
            PropertyValue::Bytes(vec![1, 2]).into_bytes("ay").unwrap(),
            vec![1, 2]
        );
        assert_eq!(PropertyValue::UInt(83).into_bytes("y").unwrap(), vec![83]);
        assert_eq!(
            PropertyValue::UInt(0x0102).into_bytes("q").unwrap(),
            vec![2, 1]
        );
        assert_eq!(PropertyValue::Bool(true).into_bytes("b").unwrap(), vec![1]);
        assert!(PropertyValue::UInt(1).into_bytes("a{sv}").is_err());
    }

    #[tokio::test]
    async fn sink_order() {
        let sink = Sink::default();
        sink.push(PropertyValue::UInt(1));
        sink.push(PropertyValue::UInt(2));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.next().await, PropertyValue::UInt(1));
        assert_eq!(sink.next().await, PropertyValue::UInt(2));
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test]
    async fn sink_wakes_pending_reader() {
        let sink = Arc::new(Sink::default());
        let reader = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.next().await })
        };
        tokio::task::yield_now().await;
        sink.push(PropertyValue::Bool(true));
        assert_eq!(reader.await.unwrap(), PropertyValue::Bool(true));
    }

    #[tokio::test]
    async fn cancelled_get_leaves_value() {
        let sink = Arc::new(Sink::default());
        {
            let next = sink.next();
            futures::pin_mut!(next);
            assert!(futures::poll!(next).is_pending());
            // dropped here without consuming anything
        }
        sink.push(PropertyValue::UInt(7));
        assert_eq!(sink.next().await, PropertyValue::UInt(7));
    }
}
