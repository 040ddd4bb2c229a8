//! One-shot "golden backup" run against a single device.
//!
//! The run is strictly linear: `NotConnected -> Connected -> RequestSent -> Closed`. Any failure
//! ends it with [`BackupError::OperationFailed`]; once a link was acquired it is closed on every
//! exit path.

use std::io::Write;
use std::time::Duration;

use log::{debug, info};
use tokio::time::sleep;

use crate::admin::BackupRequest;
use crate::config::DEFAULT_SETTLE_DELAY_MS;
use crate::meshtastic::{DeviceLink, LinkError, LinkOpener};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// The only failure class a run reports. The description is shown to the operator verbatim.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("{0}")]
    OperationFailed(String),
}

impl From<LinkError> for BackupError {
    fn from(e: LinkError) -> Self {
        BackupError::OperationFailed(e.to_string())
    }
}

impl From<std::io::Error> for BackupError {
    fn from(e: std::io::Error) -> Self {
        BackupError::OperationFailed(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotConnected,
    Connected,
    RequestSent,
    Closed,
}

/// Outcome of a successful run. A report only exists once the link is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub port: String,
    pub node_num: u32,
    pub packet_id: u32,
}

pub struct BackupCommandRunner<O> {
    opener: O,
    settle_delay: Duration,
}

impl<O: LinkOpener> BackupCommandRunner<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Connect to `port`, send one SD-card backup request, wait, disconnect.
    /// Progress lines go to `out`.
    pub async fn run<W: Write>(&self, port: &str, out: &mut W) -> Result<RunReport, BackupError> {
        let mut state = RunState::NotConnected;
        let mut link = self.opener.open(port).await?;
        advance(&mut state, RunState::Connected);

        let node_num = link.my_node_num();
        let sent = self.send_backup(&mut link, &mut state, out).await;
        let packet_id = match sent {
            Ok(id) => id,
            Err(e) => {
                if let Err(close_err) = link.close() {
                    debug!("Ignoring close failure after error: {}", close_err);
                }
                return Err(e);
            }
        };

        link.close()?;
        advance(&mut state, RunState::Closed);
        writeln!(out, "Done - reboot device to verify in logs")?;

        Ok(RunReport {
            port: port.to_string(),
            node_num,
            packet_id,
        })
    }

    async fn send_backup<L: DeviceLink, W: Write>(
        &self,
        link: &mut L,
        state: &mut RunState,
        out: &mut W,
    ) -> Result<u32, BackupError> {
        writeln!(out, "Connected to node {}", link.my_node_num())?;

        let request = BackupRequest::sd_card();
        let payload = request.encode_to_vec();
        let packet_id = link.send_data(&payload, request.port_num(), true)?;
        advance(state, RunState::RequestSent);
        info!(
            "Backup request ({:?}) sent as packet {} to node {}",
            request.location(),
            packet_id,
            link.my_node_num()
        );
        writeln!(out, "Golden backup command sent")?;
        out.flush()?;

        debug!("Waiting {:?} before disconnecting", self.settle_delay);
        sleep(self.settle_delay).await;
        Ok(packet_id)
    }

    /// Run and map the outcome to a process exit status, printing `Error: <description>` on
    /// failure.
    pub async fn run_to_exit_code<W: Write>(&self, port: &str, out: &mut W) -> i32 {
        match self.run(port, out).await {
            Ok(_) => EXIT_OK,
            Err(e) => {
                let _ = writeln!(out, "Error: {}", e);
                EXIT_FAILURE
            }
        }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!("backup run: {:?} -> {:?}", state, next);
    *state = next;
}
