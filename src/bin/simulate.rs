//! Send a fake power-on message pair for `25486h,5397s,32768b,3612k,on`
//! to a bridge on localhost, acting as a stand-in Pop switch for testing.
//!
//! Run with: cargo run --bin simulate

use pop_http_rs::{BROADCAST_SITE, BROADCAST_TARGET, Config, Message, POWER_ON, Session};
use tokio::net::UdpSocket;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut session = Session::new();
    let target = format!("127.0.0.1:{}", Config::DEFAULT_PORT);

    let messages = [
        Message::LightSetColor {
            stream: 0,
            hue: 25486,
            saturation: 5397,
            brightness: 32768,
            kelvin: 3612,
            duration: 1000,
        },
        Message::LightSetPower {
            level: POWER_ON,
            duration: 1000,
        },
    ];
    for message in &messages {
        let bytes = session.encode(message, BROADCAST_TARGET, BROADCAST_SITE);
        socket.send_to(&bytes, &target).await?;
    }
    Ok(())
}
