//! Parsing of D-Bus introspection XML, used to walk the GATT object tree
//! under a device without fetching every object on the bus.

use async_trait::async_trait;
use dbus::nonblock::stdintf::org_freedesktop_dbus::Introspectable;
use serde_derive::Deserialize;

use crate::Error;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct Node {
    pub name: Option<String>,
    #[serde(rename = "interface", default)]
    pub interfaces: Vec<Interface>,
    #[serde(rename = "node", default)]
    pub nodes: Vec<Node>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct Interface {
    pub name: String,
}

#[async_trait]
pub(crate) trait IntrospectParse {
    /// Fetch the introspection XML of the object and parse it.
    async fn introspect_parse(&self) -> Result<Node, Error>;
}

#[async_trait]
impl<T: Introspectable + Send + Sync> IntrospectParse for T {
    async fn introspect_parse(&self) -> Result<Node, Error> {
        let xml = self.introspect().await?;
        Ok(serde_xml_rs::from_str(&xml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_subtree() {
        let node: Node = serde_xml_rs::from_str(
            r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
            "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
            <node>
                <interface name="org.freedesktop.DBus.Introspectable"/>
                <interface name="org.bluez.Device1"/>
                <node name="service000c"/>
                <node name="service0021"/>
            </node>"#,
        )
        .unwrap();
        assert_eq!(
            node.nodes
                .iter()
                .filter_map(|n| n.name.as_deref())
                .collect::<Vec<_>>(),
            vec!["service000c", "service0021"]
        );
        assert_eq!(
            node.interfaces,
            vec![
                Interface {
                    name: "org.freedesktop.DBus.Introspectable".to_string(),
                },
                Interface {
                    name: "org.bluez.Device1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn parse_anonymous_root() {
        let node: Node = serde_xml_rs::from_str("<node></node>").unwrap();
        assert_eq!(node.name, None);
        assert!(node.nodes.is_empty());
    }
}
