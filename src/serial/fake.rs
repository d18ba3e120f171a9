//! Scripted serial devices for exercising discovery, handshake and fault
//! handling without hardware.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::display::{protocol_for, rev_d, DriverOptions, Revision};
use crate::{Error, Result};

use super::{LinkSettings, PortBackend, PortCandidate, SerialLink};

/// Identification reply a healthy device of `revision` sends to its hello.
pub fn device_reply(revision: Revision) -> Vec<u8> {
    match revision {
        Revision::A => vec![0x01; 6],
        Revision::B => {
            // 0x0B in byte 6 marks the A02 sub-revision.
            let mut reply = vec![0u8; 10];
            reply[0] = 0xCA;
            reply[6] = 0x0B;
            reply[9] = 0xCA;
            reply
        }
        Revision::C => b"chs_5inch.dev1_rom1.87\0".to_vec(),
        Revision::D => rev_d::encode_message(0x01, b"OK"),
        Revision::Simu => Vec::new(),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    /// Revision this device answers hellos for; `None` stays silent.
    revision: Option<Revision>,
    writes: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    fail_writes: bool,
    /// Writes left before failures start; `None` means unlimited.
    writes_before_failure: Option<usize>,
    opens: usize,
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A serial link backed by shared in-memory state. Clones observe the same device.
#[derive(Debug, Clone)]
pub struct FakeLink {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeLink {
    /// A device that answers the identification request of `revision`.
    pub fn device(name: impl Into<String>, revision: Revision) -> Self {
        Self::with_state(
            name,
            FakeState {
                revision: Some(revision),
                ..FakeState::default()
            },
        )
    }

    /// A port that accepts writes but never answers.
    pub fn silent(name: impl Into<String>) -> Self {
        Self::with_state(name, FakeState::default())
    }

    fn with_state(name: impl Into<String>, state: FakeState) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Every `write_all` call so far, one entry per call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    pub fn bytes_written(&self) -> usize {
        lock(&self.state).writes.iter().map(Vec::len).sum()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    /// Make every following write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        let mut state = lock(&self.state);
        state.fail_writes = fail;
        state.writes_before_failure = None;
    }

    /// Let `count` more writes through, then fail the rest.
    pub fn fail_after_writes(&self, count: usize) {
        let mut state = lock(&self.state);
        state.fail_writes = false;
        state.writes_before_failure = Some(count);
    }

    /// Number of times a backend opened this device.
    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }
}

impl SerialLink for FakeLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if let Some(left) = state.writes_before_failure.as_mut() {
            if *left == 0 {
                state.fail_writes = true;
            } else {
                *left -= 1;
            }
        }
        if state.fail_writes {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                format!("{} unplugged", self.name),
            )));
        }
        if let Some(revision) = state.revision {
            let protocol = protocol_for(revision, &DriverOptions::default());
            if bytes == protocol.hello().as_slice() {
                state.pending.extend(device_reply(revision));
            }
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pending.len() < buf.len() {
            state.pending.clear();
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::TimedOut,
                format!("{} did not answer", self.name),
            )));
        }
        for slot in buf.iter_mut() {
            *slot = state.pending.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        lock(&self.state).pending.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum FakeEndpoint {
    Device(FakeLink),
    /// Listed by the OS but fails to open.
    Broken,
}

#[derive(Debug, Default)]
struct PortsState {
    order: Vec<PortCandidate>,
    endpoints: HashMap<String, FakeEndpoint>,
    failed_opens: usize,
}

/// Port backend listing scripted devices. Clones share the same port table,
/// so a test can unplug or re-plug devices after handing a clone away.
#[derive(Debug, Clone, Default)]
pub struct FakePorts {
    state: Arc<Mutex<PortsState>>,
}

impl FakePorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// List a port backed by `link`.
    pub fn with_device(self, candidate: PortCandidate, link: FakeLink) -> Self {
        self.plug(candidate, link);
        self
    }

    /// List a port that refuses to open.
    pub fn with_broken(self, candidate: PortCandidate) -> Self {
        {
            let mut state = self.lock();
            state.endpoints.insert(candidate.name.clone(), FakeEndpoint::Broken);
            state.order.retain(|c| c.name != candidate.name);
            state.order.push(candidate);
        }
        self
    }

    pub fn plug(&self, candidate: PortCandidate, link: FakeLink) {
        let mut state = self.lock();
        state
            .endpoints
            .insert(candidate.name.clone(), FakeEndpoint::Device(link));
        state.order.retain(|c| c.name != candidate.name);
        state.order.push(candidate);
    }

    /// Remove a port; it vanishes from the listing and opens fail.
    pub fn unplug(&self, name: &str) {
        let mut state = self.lock();
        state.endpoints.remove(name);
        state.order.retain(|c| c.name != name);
    }

    pub fn failed_opens(&self) -> usize {
        self.lock().failed_opens
    }

    fn lock(&self) -> MutexGuard<'_, PortsState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PortBackend for FakePorts {
    fn candidates(&self) -> Result<Vec<PortCandidate>> {
        Ok(self.lock().order.clone())
    }

    fn open(&self, port: &str, _settings: &LinkSettings) -> Result<Box<dyn SerialLink>> {
        let mut state = self.lock();
        match state.endpoints.get(port).cloned() {
            Some(FakeEndpoint::Device(link)) => {
                lock(&link.state).opens += 1;
                Ok(Box::new(link))
            }
            Some(FakeEndpoint::Broken) => {
                state.failed_opens += 1;
                Err(Error::Io(std::io::Error::new(
                    ErrorKind::PermissionDenied,
                    format!("{port}: permission denied"),
                )))
            }
            None => {
                state.failed_opens += 1;
                Err(Error::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("{port}: no such device"),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::protocol::identify;

    #[test]
    fn device_answers_its_own_hello() {
        let mut link = FakeLink::device("/dev/fake0", Revision::D);
        let mut proto = protocol_for(Revision::D, &DriverOptions::default());
        identify(proto.as_mut(), &mut link, Duration::from_millis(10)).unwrap();
        assert_eq!(link.writes().len(), 1);
    }

    #[test]
    fn device_ignores_other_revisions() {
        let mut link = FakeLink::device("/dev/fake0", Revision::B);
        let mut proto = protocol_for(Revision::A, &DriverOptions::default());
        let err = identify(proto.as_mut(), &mut link, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn failure_injection_after_count() {
        let mut link = FakeLink::silent("/dev/fake0");
        link.fail_after_writes(2);
        assert!(link.write_all(b"a").is_ok());
        assert!(link.write_all(b"b").is_ok());
        assert!(link.write_all(b"c").is_err());
        assert!(link.write_all(b"d").is_err());
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn ports_list_and_open() {
        let ports = FakePorts::new()
            .with_broken(PortCandidate::plain("/dev/ttyACM0"))
            .with_device(
                PortCandidate::plain("/dev/ttyACM1"),
                FakeLink::device("/dev/ttyACM1", Revision::A),
            );
        let names: Vec<_> = ports
            .candidates()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["/dev/ttyACM0", "/dev/ttyACM1"]);
        assert!(ports.open("/dev/ttyACM0", &LinkSettings::default()).is_err());
        assert!(ports.open("/dev/ttyACM1", &LinkSettings::default()).is_ok());
        ports.unplug("/dev/ttyACM1");
        assert!(ports.open("/dev/ttyACM1", &LinkSettings::default()).is_err());
        assert_eq!(ports.failed_opens(), 2);
    }
}
