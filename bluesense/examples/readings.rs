//! Read temperature and humidity from a SensorTag device given its MAC
//! address.

use bluesense::{connect, humidity, set_interval, temperature, Make};
use eyre::{eyre, Report};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Report> {
    pretty_env_logger::init();

    let mac = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("MAC address of the device expected"))?
        .parse()?;

    let temperature = set_interval(
        temperature(mac, Make::SensorTag)?,
        Duration::from_secs(1),
    );
    let humidity = set_interval(humidity(mac, Make::SensorTag)?, Duration::from_secs(1));

    let session = connect(
        vec![
            temperature.descriptor().clone(),
            humidity.descriptor().clone(),
        ],
        "hci0",
    )
    .await?;

    for _ in 0..10 {
        let (t, h) = tokio::try_join!(session.read(&temperature), session.read(&humidity))?;
        println!("{:.2} °C  {:.1} %", t, h);
    }

    session.close().await;
    Ok(())
}
