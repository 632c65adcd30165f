//! Generated async D-Bus bindings for talking to BlueZ on Linux.
//!
//! Only the interfaces consumed by the `bluesense` crate are included. The
//! modules were generated with `dbus-codegen-rust` from the interface
//! descriptions shipped with BlueZ; see the per-module headers for the
//! exact invocations.

mod adapter1;
mod agentmanager1;
mod battery1;
mod device1;
mod gattcharacteristic1;
mod profilemanager1;

pub use adapter1::*;
pub use agentmanager1::*;
pub use battery1::*;
pub use device1::*;
pub use gattcharacteristic1::*;
pub use profilemanager1::*;
