//! The UDP server loop tying codec, tracker, and router together.

use std::net::SocketAddr;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::errors::Error;
use crate::protocol::{self, Decoded, Message, POWER_ON, Session};
use crate::tracker::Tracker;

type Result<T> = std::result::Result<T, Error>;

/// Largest datagram accepted from the wire.
const MAX_DATAGRAM: usize = 4096;

/// The emulated light: receives protocol datagrams, keeps the bridge
/// convinced it is talking to a real device, and turns deduplicated
/// button presses into webhook calls.
pub struct Server {
    socket: UdpSocket,
    config: Config,
    session: Session,
    tracker: Tracker,
    dispatcher: Dispatcher,
}

impl Server {
    /// Bind the configured address and prepare the pipeline.
    pub async fn bind(config: Config) -> Result<Server> {
        let socket = UdpSocket::bind(config.bind_addr())
            .await
            .map_err(|e| Error::socket("bind", e))?;
        Ok(Server {
            socket,
            config,
            session: Session::new(),
            tracker: Tracker::new(),
            dispatcher: Dispatcher::new()?,
        })
    }

    /// The locally bound address (the configured one unless port 0 was
    /// requested).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))
    }

    /// Receive and process datagrams forever.
    ///
    /// One datagram is fully handled (reply, tracking, dispatch) before
    /// the next is read, so the tracker and its dedup state never see
    /// concurrent access.
    pub async fn run(&mut self) -> Result<()> {
        info!("server started on {}", self.local_addr()?);
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| Error::socket("recv_from", e))?;
            self.process(&buf[..len], addr).await;
        }
    }

    async fn process(&mut self, data: &[u8], addr: SocketAddr) {
        let SocketAddr::V4(v4) = addr else {
            debug!("{addr} recv ignoring non-IPv4 sender");
            return;
        };
        if !self.config.ip_filter.allows(*v4.ip()) {
            debug!("{addr} recv filtering packet {data:?}");
            return;
        }

        let packet = match protocol::decode(data) {
            Ok(Decoded::Packet(packet)) => packet,
            Ok(Decoded::Unrecognized { code }) => {
                debug!("{addr} recv unknown packet code {code}");
                return;
            }
            Err(err) => {
                debug!("{addr} recv dropping datagram: {err}");
                return;
            }
        };

        debug!("{addr} recv {:?}", packet.message);

        if let Some(reply) = reply_for(&packet.message) {
            debug!("{addr} send {reply:?}");
            let bytes = self
                .session
                .encode(&reply, packet.header.target, packet.header.site);
            if let Err(err) = self.socket.send_to(&bytes, addr).await {
                error!("{addr} send failed: {err}");
            }
        }

        let Some(trigger) = self.tracker.handle(addr, &packet) else {
            return;
        };

        let records = self.config.router.resolve(&trigger.state);
        if records.is_empty() {
            warn!("{addr} request {} not mapped to a URL", trigger.state);
            return;
        }
        for record in &records {
            self.dispatcher.dispatch(trigger.sender, record).await;
        }
    }
}

// A version query gets a fixed vendor/product/version triple, a state
// query gets the fabricated "Pop HTTP" light state, and both set
// messages get a bare acknowledgment. Replies echo the request's
// target and site ids unchanged.
fn reply_for(message: &Message) -> Option<Message> {
    match message {
        Message::GetVersion => Some(Message::StateVersion {
            vendor: 1,
            product: 36,
            version: 0,
        }),
        Message::LightGet => Some(Message::LightState {
            hue: 0,
            saturation: 655,
            brightness: 65535,
            kelvin: 2500,
            dim: 0,
            power: POWER_ON,
            label: "Pop HTTP".to_string(),
            tags: 0,
        }),
        Message::LightSetPower { .. } | Message::LightSetColor { .. } => {
            Some(Message::Acknowledgment)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_reply_table() {
        assert_eq!(
            reply_for(&Message::GetVersion),
            Some(Message::StateVersion {
                vendor: 1,
                product: 36,
                version: 0,
            })
        );
        match reply_for(&Message::LightGet) {
            Some(Message::LightState {
                hue,
                saturation,
                brightness,
                kelvin,
                power,
                label,
                ..
            }) => {
                assert_eq!(hue, 0);
                assert_eq!(saturation, 655);
                assert_eq!(brightness, 65535);
                assert_eq!(kelvin, 2500);
                assert_eq!(power, POWER_ON);
                assert_eq!(label, "Pop HTTP");
            }
            other => panic!("expected light state reply, got {:?}", other),
        }
        assert_eq!(
            reply_for(&Message::LightSetPower {
                level: POWER_ON,
                duration: 0,
            }),
            Some(Message::Acknowledgment)
        );
        assert_eq!(reply_for(&Message::Acknowledgment), None);
        assert_eq!(reply_for(&Message::StateVersion { vendor: 0, product: 0, version: 0 }), None);
    }

    async fn exchange(client: &UdpSocket, server_addr: SocketAddr, bytes: &[u8]) -> Message {
        client.send_to(bytes, server_addr).await.unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match protocol::decode(&buf[..len]).unwrap() {
            Decoded::Packet(packet) => {
                // replies echo the request's target and site ids
                assert_eq!(packet.header.target, [7; 8]);
                assert_eq!(packet.header.site, [3; 6]);
                packet.message
            }
            other => panic!("expected packet reply, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_protocol_replies_over_loopback() {
        let config = Config::from_toml("interface = \"127.0.0.1\"\nport = 0").unwrap();
        let server = Server::bind(config).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut server = server;
            let _ = server.run().await;
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut session = Session::with_source(42);

        let reply = exchange(
            &client,
            server_addr,
            &session.encode(&Message::GetVersion, [7; 8], [3; 6]),
        )
        .await;
        assert_eq!(
            reply,
            Message::StateVersion {
                vendor: 1,
                product: 36,
                version: 0,
            }
        );

        let reply = exchange(
            &client,
            server_addr,
            &session.encode(&Message::LightGet, [7; 8], [3; 6]),
        )
        .await;
        match reply {
            Message::LightState { label, power, .. } => {
                assert_eq!(label, "Pop HTTP");
                assert_eq!(power, POWER_ON);
            }
            other => panic!("expected light state, got {:?}", other),
        }

        let reply = exchange(
            &client,
            server_addr,
            &session.encode(
                &Message::LightSetPower {
                    level: POWER_ON,
                    duration: 1000,
                },
                [7; 8],
                [3; 6],
            ),
        )
        .await;
        assert_eq!(reply, Message::Acknowledgment);
    }
}
