//! Exchange a few bytes with an OSTC dive computer over the serial
//! transport.

use bluesense::{connect, serial, Make};
use eyre::{eyre, Report};

#[tokio::main]
async fn main() -> Result<(), Report> {
    pretty_env_logger::init();

    let mac = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("MAC address of the device expected"))?
        .parse()?;

    let device = serial(mac, Make::Ostc)?;
    let session = connect(vec![device.descriptor().clone()], "hci0").await?;
    session.connected(mac).await?;

    // start communication and read the echoed handshake
    session.write(&device, &[0xbb]).await?;
    let reply = session.read_serial(&device, 4).await?;
    println!("{:02x?}", reply);

    session.close().await;
    Ok(())
}
