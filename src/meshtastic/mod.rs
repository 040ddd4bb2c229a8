//! # Meshtastic Device Communication Module
//!
//! Connection lifecycle for a Meshtastic device attached over USB/UART serial, speaking the
//! client protobuf API (`ToRadio` / `FromRadio`).
//!
//! ## Link lifecycle
//!
//! 1. Open the serial port exclusively (8N1, no flow control).
//! 2. Wake the serial API and request the configuration stream (`want_config_id`).
//! 3. Read frames until the device reported its node number (`my_info`) and finished the
//!    configuration push (`config_complete_id` echoing our request id).
//! 4. Send data packets on a chosen port number.
//! 5. Send `disconnect` and release the port.
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use meshbackup::meshtastic::{DeviceLink, LinkOpener, LinkSettings, SerialOpener};
//! use meshbackup::protobuf::meshtastic_generated::PortNum;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let opener = SerialOpener::new(LinkSettings::default());
//!     let mut link = opener.open("/dev/ttyUSB0").await?;
//!     println!("node {}", link.my_node_num());
//!     link.send_data(b"ping", PortNum::PrivateApp, false)?;
//!     link.close()?;
//!     Ok(())
//! }
//! # }
//! ```
//!
//! The traits [`LinkOpener`] and [`DeviceLink`] are the seam the backup runner is written
//! against, so tests can substitute an in-memory device.

pub mod framer;

use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use prost::Message;

use framer::FrameDecoder;

use crate::logutil::escape_log;
use crate::protobuf::meshtastic_generated as proto;

/// Errors raised by a device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("could not open port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("timed out after {secs}s waiting for the device configuration")]
    HandshakeTimeout { secs: u64 },

    #[error("handshake timeout of {secs}s is out of range")]
    TimeoutOutOfRange { secs: u64 },

    #[error("device finished its configuration without reporting a node number")]
    MissingNodeInfo,

    #[error("payload too large for a serial frame ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("connection already closed")]
    Closed,

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tunables for opening a link, typically sourced from Config.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound for the configuration handshake after the port is open.
    pub connect_timeout: Duration,
    /// Hop limit stamped on outgoing packets.
    pub hop_limit: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            connect_timeout: Duration::from_secs(30),
            hop_limit: 3,
        }
    }
}

/// An open, configured connection to one device.
pub trait DeviceLink {
    /// Node number the device reported during the handshake.
    fn my_node_num(&self) -> u32;

    /// Send `payload` on `port_num`, addressed to the connected node. Returns the packet id.
    ///
    /// `want_ack` only asks the transport for an acknowledgment; this call does not wait for it.
    fn send_data(
        &mut self,
        payload: &[u8],
        port_num: proto::PortNum,
        want_ack: bool,
    ) -> Result<u32, LinkError>;

    /// Release the connection. Calling it again after a successful close is a no-op.
    fn close(&mut self) -> Result<(), LinkError>;
}

/// Acquires [`DeviceLink`]s by port name.
#[allow(async_fn_in_trait)]
pub trait LinkOpener {
    type Link: DeviceLink;

    async fn open(&self, port: &str) -> Result<Self::Link, LinkError>;
}

/// Random non-zero id for packets and config requests (zero means "unset" on the wire).
fn nonzero_id() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Build the `ToRadio` carrying one data packet.
pub fn data_packet(
    from: u32,
    to: u32,
    id: u32,
    hop_limit: u32,
    payload: &[u8],
    port_num: proto::PortNum,
    want_ack: bool,
) -> proto::ToRadio {
    use proto::mesh_packet::{PayloadVariant as MPPayload, Priority};
    use proto::to_radio::PayloadVariant as TRPayload;

    let data_msg = proto::Data {
        portnum: port_num as i32,
        payload: payload.to_vec().into(),
        want_response: false,
        ..Default::default()
    };
    let priority = if want_ack {
        Priority::Reliable
    } else {
        Priority::Default
    };
    let pkt = proto::MeshPacket {
        from,
        to,
        channel: 0,
        payload_variant: Some(MPPayload::Decoded(data_msg)),
        id,
        hop_limit,
        want_ack,
        priority: priority as i32,
        ..Default::default()
    };
    proto::ToRadio {
        payload_variant: Some(TRPayload::Packet(pkt)),
    }
}

/// Progress of the want-config handshake, fed one `FromRadio` at a time.
#[derive(Debug)]
pub struct Handshake {
    request_id: u32,
    my_node_num: Option<u32>,
    deadline: Instant,
    timeout: Duration,
}

impl Handshake {
    /// Start a handshake for `request_id` that must finish within `timeout` of `now`.
    pub fn new(request_id: u32, now: Instant, timeout: Duration) -> Result<Self, LinkError> {
        let deadline = now
            .checked_add(timeout)
            .ok_or(LinkError::TimeoutOutOfRange {
                secs: timeout.as_secs(),
            })?;
        Ok(Self {
            request_id,
            my_node_num: None,
            deadline,
            timeout,
        })
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn timeout_error(&self) -> LinkError {
        LinkError::HandshakeTimeout {
            secs: self.timeout.as_secs(),
        }
    }

    /// Handle one message. `Some` once the device completed the config push for our request.
    pub fn on_from_radio(&mut self, msg: proto::FromRadio) -> Option<Result<u32, LinkError>> {
        use proto::from_radio::PayloadVariant as FRPayload;
        match msg.payload_variant {
            Some(FRPayload::MyInfo(info)) => {
                debug!(
                    "MYINFO node={} reboots={}",
                    info.my_node_num, info.reboot_count
                );
                self.my_node_num = Some(info.my_node_num);
            }
            Some(FRPayload::ConfigCompleteId(id)) if id == self.request_id => {
                debug!("Config complete (id=0x{:08x})", id);
                return Some(self.my_node_num.ok_or(LinkError::MissingNodeInfo));
            }
            Some(FRPayload::ConfigCompleteId(id)) => {
                debug!("Ignoring config_complete for foreign id 0x{:08x}", id);
            }
            Some(FRPayload::LogRecord(rec)) => {
                debug!("device log [{}] {}", rec.source, escape_log(&rec.message));
            }
            Some(FRPayload::QueueStatus(qs)) => {
                trace!("QUEUE_STATUS res={} free={}/{}", qs.res, qs.free, qs.maxlen);
            }
            Some(FRPayload::Rebooted(_)) => {
                warn!("Device reported a reboot during the handshake");
            }
            Some(other) => trace!("Handshake frame: {:?}", other),
            None => trace!("FromRadio without payload (id={})", msg.id),
        }
        None
    }

    /// Decode and handle every complete frame buffered in `decoder`.
    pub fn drain(&mut self, decoder: &mut FrameDecoder) -> Option<Result<u32, LinkError>> {
        while let Some(frame) = decoder.next_frame() {
            match proto::FromRadio::decode(frame.as_slice()) {
                Ok(msg) => {
                    if let Some(done) = self.on_from_radio(msg) {
                        return Some(done);
                    }
                }
                Err(e) => debug!("Skipping undecodable frame ({} bytes): {}", frame.len(), e),
            }
        }
        if let Some(text) = decoder.take_console_text() {
            debug!("device console: {}", escape_log(text.trim()));
        }
        None
    }
}

#[cfg(feature = "serial")]
pub use serial::{SerialLink, SerialOpener};

#[cfg(feature = "serial")]
mod serial {
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    use log::{debug, info, trace};
    use prost::Message;
    use serialport::SerialPort;
    use tokio::time::sleep;

    use super::framer::{self, FrameDecoder};
    use super::{nonzero_id, proto, DeviceLink, Handshake, LinkError, LinkOpener, LinkSettings};
    use crate::logutil::hex_snippet;

    const READ_TIMEOUT: Duration = Duration::from_millis(100);

    /// Opens [`SerialLink`]s with fixed settings.
    #[derive(Debug, Clone, Default)]
    pub struct SerialOpener {
        settings: LinkSettings,
    }

    impl SerialOpener {
        pub fn new(settings: LinkSettings) -> Self {
            Self { settings }
        }
    }

    impl LinkOpener for SerialOpener {
        type Link = SerialLink;

        async fn open(&self, port: &str) -> Result<SerialLink, LinkError> {
            SerialLink::connect(port, &self.settings).await
        }
    }

    /// A Meshtastic device on a serial port, past the configuration handshake.
    pub struct SerialLink {
        port_name: String,
        port: Option<Box<dyn SerialPort>>,
        my_node_num: u32,
        hop_limit: u32,
    }

    impl SerialLink {
        pub async fn connect(port_name: &str, settings: &LinkSettings) -> Result<Self, LinkError> {
            info!(
                "Opening Meshtastic device on {} at {} baud",
                port_name, settings.baud_rate
            );
            let mut builder = serialport::new(port_name, settings.baud_rate)
                .timeout(READ_TIMEOUT)
                .flow_control(serialport::FlowControl::None);
            // Some USB serial adapters need explicit settings
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder.open().map_err(|e| LinkError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

            // Small settle delay, then drop whatever the device printed before we attached
            sleep(Duration::from_millis(100)).await;
            if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
                debug!("Could not purge input buffer on {}: {}", port_name, e);
            }

            port.write_all(&framer::wake_sequence())?;
            port.flush()?;
            sleep(Duration::from_millis(100)).await;

            let mut link = SerialLink {
                port_name: port_name.to_string(),
                port: Some(port),
                my_node_num: 0,
                hop_limit: settings.hop_limit,
            };
            link.my_node_num = link.await_config(settings.connect_timeout).await?;
            info!(
                "Meshtastic device on {} is node {} (0x{:08x})",
                port_name, link.my_node_num, link.my_node_num
            );
            Ok(link)
        }

        /// Request the configuration stream and read until it completes. Returns our node number.
        async fn await_config(&mut self, timeout: Duration) -> Result<u32, LinkError> {
            use proto::to_radio::PayloadVariant as TRPayload;

            let mut handshake = Handshake::new(nonzero_id(), Instant::now(), timeout)?;
            debug!(
                "Requesting device config (want_config_id=0x{:08x})",
                handshake.request_id()
            );
            self.send_toradio(&proto::ToRadio {
                payload_variant: Some(TRPayload::WantConfigId(handshake.request_id())),
            })?;

            let mut decoder = FrameDecoder::new();
            let mut buffer = [0u8; 512];

            while !handshake.expired(Instant::now()) {
                let port = self.port.as_mut().ok_or(LinkError::Closed)?;
                match port.read(&mut buffer) {
                    Ok(n) if n > 0 => {
                        trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                        decoder.push(&buffer[..n]);
                    }
                    Ok(_) => {
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(LinkError::Io(e)),
                }

                if let Some(done) = handshake.drain(&mut decoder) {
                    return done;
                }
            }
            Err(handshake.timeout_error())
        }

        fn send_toradio(&mut self, msg: &proto::ToRadio) -> Result<(), LinkError> {
            let port = self.port.as_mut().ok_or(LinkError::Closed)?;
            let mut payload = Vec::with_capacity(msg.encoded_len());
            msg.encode(&mut payload)?;
            let frame = framer::encode_frame(&payload)?;
            port.write_all(&frame)?;
            port.flush()?;
            debug!("Sent ToRadio frame ({} bytes payload)", payload.len());
            trace!("ToRadio payload hex:{}", hex_snippet(&payload, payload.len()));
            Ok(())
        }
    }

    impl DeviceLink for SerialLink {
        fn my_node_num(&self) -> u32 {
            self.my_node_num
        }

        fn send_data(
            &mut self,
            payload: &[u8],
            port_num: proto::PortNum,
            want_ack: bool,
        ) -> Result<u32, LinkError> {
            let id = nonzero_id();
            let msg = super::data_packet(
                self.my_node_num,
                self.my_node_num,
                id,
                self.hop_limit,
                payload,
                port_num,
                want_ack,
            );
            self.send_toradio(&msg)?;
            debug!(
                "Sent {:?} packet id={} to=0x{:08x} want_ack={} ({} bytes)",
                port_num,
                id,
                self.my_node_num,
                want_ack,
                payload.len()
            );
            Ok(id)
        }

        fn close(&mut self) -> Result<(), LinkError> {
            use proto::to_radio::PayloadVariant as TRPayload;
            if self.port.is_none() {
                return Ok(());
            }
            info!("Disconnecting from Meshtastic device on {}", self.port_name);
            let result = self.send_toradio(&proto::ToRadio {
                payload_variant: Some(TRPayload::Disconnect(true)),
            });
            // The port is released even when the disconnect frame could not be written
            self.port = None;
            result
        }
    }

    impl Drop for SerialLink {
        fn drop(&mut self) {
            if self.port.is_some() {
                if let Err(e) = self.close() {
                    debug!("Close on drop failed for {}: {}", self.port_name, e);
                }
            }
        }
    }
}
