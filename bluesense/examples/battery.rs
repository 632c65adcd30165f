//! Print the battery level of a device whenever it changes.

use bluesense::{battery_level, connect, Make};
use eyre::{eyre, Report};
use futures::{pin_mut, StreamExt};

#[tokio::main]
async fn main() -> Result<(), Report> {
    pretty_env_logger::init();

    let mac = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("MAC address of the device expected"))?
        .parse()?;

    let battery = battery_level(mac, Make::Standard)?;
    let session = connect(vec![battery.descriptor().clone()], "hci0").await?;

    let levels = session.read_all(&battery);
    pin_mut!(levels);
    while let Some(level) = levels.next().await {
        println!("battery: {}%", level);
    }
    Ok(())
}
