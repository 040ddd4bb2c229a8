//! Test doubles for the device link.
//! An in-memory device that records what the runner did so tests can assert on it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use meshbackup::meshtastic::{DeviceLink, LinkError, LinkOpener};
use meshbackup::protobuf::meshtastic_generated::PortNum;

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub payload: Vec<u8>,
    pub port_num: PortNum,
    pub want_ack: bool,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct Journal {
    pub opened: Vec<String>,
    pub sent: Vec<SentPacket>,
    pub close_calls: usize,
    pub closed_at: Option<Instant>,
}

#[derive(Debug, Clone)]
enum Behavior {
    Accept,
    FailOpen(String),
    FailSend(String),
    FailClose(String),
}

#[derive(Debug, Clone)]
pub struct FakeOpener {
    node_num: u32,
    behavior: Behavior,
    journal: Arc<Mutex<Journal>>,
}

#[allow(dead_code)]
impl FakeOpener {
    pub fn accepting(node_num: u32) -> Self {
        Self::with(node_num, Behavior::Accept)
    }

    pub fn failing_open(reason: &str) -> Self {
        Self::with(0, Behavior::FailOpen(reason.to_string()))
    }

    pub fn failing_send(node_num: u32, reason: &str) -> Self {
        Self::with(node_num, Behavior::FailSend(reason.to_string()))
    }

    pub fn failing_close(node_num: u32, reason: &str) -> Self {
        Self::with(node_num, Behavior::FailClose(reason.to_string()))
    }

    fn with(node_num: u32, behavior: Behavior) -> Self {
        Self {
            node_num,
            behavior,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        self.journal.clone()
    }
}

impl LinkOpener for FakeOpener {
    type Link = FakeLink;

    async fn open(&self, port: &str) -> Result<FakeLink, LinkError> {
        self.journal.lock().unwrap().opened.push(port.to_string());
        if let Behavior::FailOpen(reason) = &self.behavior {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, reason.clone()).into());
        }
        Ok(FakeLink {
            node_num: self.node_num,
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
        })
    }
}

pub struct FakeLink {
    node_num: u32,
    behavior: Behavior,
    journal: Arc<Mutex<Journal>>,
}

impl DeviceLink for FakeLink {
    fn my_node_num(&self) -> u32 {
        self.node_num
    }

    fn send_data(
        &mut self,
        payload: &[u8],
        port_num: PortNum,
        want_ack: bool,
    ) -> Result<u32, LinkError> {
        if let Behavior::FailSend(reason) = &self.behavior {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, reason.clone()).into());
        }
        let mut journal = self.journal.lock().unwrap();
        journal.sent.push(SentPacket {
            payload: payload.to_vec(),
            port_num,
            want_ack,
            at: Instant::now(),
        });
        Ok(journal.sent.len() as u32)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        let mut journal = self.journal.lock().unwrap();
        journal.close_calls += 1;
        journal.closed_at = Some(Instant::now());
        if let Behavior::FailClose(reason) = &self.behavior {
            return Err(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, reason.clone()).into(),
            );
        }
        Ok(())
    }
}

/// Captured stdout of a run as a string.
#[allow(dead_code)]
pub fn output(buf: &[u8]) -> String {
    String::from_utf8(buf.to_vec()).expect("utf-8 output")
}
