//! Purpose: In-memory Hardware Capability used by the server and the test suites.
//! Exports: `BoardSpec`, `SimulatedBoard`.
//! Role: Stands in for GPIO/UART drivers; models wired lines and linked UARTs.
//! Invariants: Clones share one board, so two registries can act as two cross-wired nodes.
//! Invariants: A serial write lands in the peer's inbound buffer under a single lock.
//! Notes: Unlinked UARTs are loopbacks (TX tied to RX of the same resource).
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::{Error, ErrorKind};
use super::hardware::{Direction, Hardware, Level, ResourceClass, ResourceId, SerialSettings};

const DEFAULT_GPIO_LINES: usize = 28;
const DEFAULT_UARTS: usize = 4;

/// Description of a simulated board, usually read from a JSON file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardSpec {
    #[serde(default)]
    pub gpio: Vec<String>,
    #[serde(default)]
    pub uart: Vec<String>,
    /// GPIO pairs sharing one electrical line.
    #[serde(default)]
    pub wires: Vec<[String; 2]>,
    /// UART pairs cross-connected TX to RX.
    #[serde(default)]
    pub links: Vec<[String; 2]>,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            gpio: (0..DEFAULT_GPIO_LINES).map(|n| format!("gpio{n}")).collect(),
            uart: (0..DEFAULT_UARTS).map(|n| format!("uart{n}")).collect(),
            wires: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl BoardSpec {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid board description")
                .with_hint("Expected {\"gpio\": [...], \"uart\": [...], \"wires\": [[a, b]], \"links\": [[a, b]]}.")
                .with_source(err)
        })
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read board file {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json(&text)
    }
}

struct Uart {
    peer: ResourceId,
    inbound: Mutex<Vec<u8>>,
    settings: Mutex<Option<SerialSettings>>,
}

struct Board {
    lines: HashMap<ResourceId, Arc<Mutex<Level>>>,
    uarts: HashMap<ResourceId, Uart>,
    faults: Mutex<HashSet<ResourceId>>,
}

#[derive(Clone)]
pub struct SimulatedBoard {
    inner: Arc<Board>,
}

impl std::fmt::Debug for SimulatedBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBoard")
            .field("gpio", &self.inner.lines.len())
            .field("uart", &self.inner.uarts.len())
            .finish()
    }
}

impl SimulatedBoard {
    pub fn new(spec: &BoardSpec) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for id in spec.gpio.iter().chain(spec.uart.iter()) {
            if !seen.insert(id.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("board declares a resource twice")
                    .with_resource(id.clone()));
            }
        }

        let mut lines: HashMap<ResourceId, Arc<Mutex<Level>>> = spec
            .gpio
            .iter()
            .map(|id| (ResourceId::new(id.clone()), Arc::new(Mutex::new(Level::Low))))
            .collect();
        for [a, b] in &spec.wires {
            let keep = lines
                .get(&ResourceId::new(a.clone()))
                .cloned()
                .ok_or_else(|| unknown_board_resource("wire", a))?;
            let merge = lines
                .get(&ResourceId::new(b.clone()))
                .cloned()
                .ok_or_else(|| unknown_board_resource("wire", b))?;
            for line in lines.values_mut() {
                if Arc::ptr_eq(line, &merge) {
                    *line = keep.clone();
                }
            }
        }

        let mut peers: HashMap<&str, &str> =
            spec.uart.iter().map(|id| (id.as_str(), id.as_str())).collect();
        for [a, b] in &spec.links {
            if !peers.contains_key(a.as_str()) {
                return Err(unknown_board_resource("link", a));
            }
            if !peers.contains_key(b.as_str()) {
                return Err(unknown_board_resource("link", b));
            }
            peers.insert(a.as_str(), b.as_str());
            peers.insert(b.as_str(), a.as_str());
        }
        let uarts = peers
            .into_iter()
            .map(|(id, peer)| {
                let uart = Uart {
                    peer: ResourceId::new(peer),
                    inbound: Mutex::new(Vec::new()),
                    settings: Mutex::new(None),
                };
                (ResourceId::new(id), uart)
            })
            .collect::<HashMap<_, _>>();

        debug!(
            gpio = lines.len(),
            uart = uarts.len(),
            "simulated board ready"
        );
        Ok(Self {
            inner: Arc::new(Board {
                lines,
                uarts,
                faults: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Drives a line from outside the server, as a peer device would.
    pub fn drive(&self, resource: &ResourceId, level: Level) -> Result<(), Error> {
        *lock(self.line(resource)?) = level;
        Ok(())
    }

    pub fn level(&self, resource: &ResourceId) -> Option<Level> {
        self.inner.lines.get(resource).map(|line| *lock(line))
    }

    /// Delivers `bytes` to the inbound path of `resource`, as a peer device would.
    pub fn inject(&self, resource: &ResourceId, bytes: &[u8]) -> Result<(), Error> {
        lock(&self.uart(resource)?.inbound).extend_from_slice(bytes);
        Ok(())
    }

    pub fn serial_settings(&self, resource: &ResourceId) -> Option<SerialSettings> {
        self.inner
            .uarts
            .get(resource)
            .and_then(|uart| *lock(&uart.settings))
    }

    /// Makes every operation on `resource` fail until cleared.
    pub fn set_fault(&self, resource: &ResourceId, faulted: bool) {
        let mut faults = lock(&self.inner.faults);
        if faulted {
            faults.insert(resource.clone());
        } else {
            faults.remove(resource);
        }
    }

    fn check_fault(&self, resource: &ResourceId) -> Result<(), Error> {
        if lock(&self.inner.faults).contains(resource) {
            return Err(Error::new(ErrorKind::Hardware)
                .with_message("resource unavailable")
                .with_resource(resource.as_str()));
        }
        Ok(())
    }

    fn line(&self, resource: &ResourceId) -> Result<&Mutex<Level>, Error> {
        self.inner
            .lines
            .get(resource)
            .map(|line| line.as_ref())
            .ok_or_else(|| missing(resource))
    }

    fn uart(&self, resource: &ResourceId) -> Result<&Uart, Error> {
        self.inner.uarts.get(resource).ok_or_else(|| missing(resource))
    }
}

impl Hardware for SimulatedBoard {
    fn resolves(&self, resource: &ResourceId, class: ResourceClass) -> bool {
        match class {
            ResourceClass::Gpio => self.inner.lines.contains_key(resource),
            ResourceClass::Uart => self.inner.uarts.contains_key(resource),
        }
    }

    fn claim_pin(&self, resource: &ResourceId, direction: Direction) -> Result<(), Error> {
        self.check_fault(resource)?;
        self.line(resource)?;
        trace!(%resource, direction = direction.as_str(), "claim pin");
        Ok(())
    }

    fn read_pin(&self, resource: &ResourceId) -> Result<Level, Error> {
        self.check_fault(resource)?;
        Ok(*lock(self.line(resource)?))
    }

    fn write_pin(&self, resource: &ResourceId, level: Level) -> Result<(), Error> {
        self.check_fault(resource)?;
        *lock(self.line(resource)?) = level;
        Ok(())
    }

    fn configure_serial(
        &self,
        resource: &ResourceId,
        settings: &SerialSettings,
    ) -> Result<(), Error> {
        self.check_fault(resource)?;
        *lock(&self.uart(resource)?.settings) = Some(*settings);
        Ok(())
    }

    fn write_serial(&self, resource: &ResourceId, bytes: &[u8]) -> Result<(), Error> {
        self.check_fault(resource)?;
        let peer = &self.uart(resource)?.peer;
        lock(&self.uart(peer)?.inbound).extend_from_slice(bytes);
        trace!(%resource, %peer, len = bytes.len(), "serial write");
        Ok(())
    }

    fn drain_serial(&self, resource: &ResourceId) -> Result<Vec<u8>, Error> {
        self.check_fault(resource)?;
        Ok(std::mem::take(&mut *lock(&self.uart(resource)?.inbound)))
    }
}

// Guarded values stay consistent under panic (plain overwrites), so poison is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn missing(resource: &ResourceId) -> Error {
    Error::new(ErrorKind::Hardware)
        .with_message("resource not present on board")
        .with_resource(resource.as_str())
}

fn unknown_board_resource(what: &str, id: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("{what} references an undeclared resource"))
        .with_resource(id)
}

#[cfg(test)]
mod tests {
    use super::{BoardSpec, SimulatedBoard};
    use crate::core::error::ErrorKind;
    use crate::core::hardware::{Hardware, Level, ResourceClass, ResourceId, SerialSettings};

    fn id(value: &str) -> ResourceId {
        ResourceId::new(value)
    }

    fn spec() -> BoardSpec {
        BoardSpec::from_json(
            r#"{
                "gpio": ["gpio1", "gpio2", "gpio3"],
                "uart": ["uart0", "uart1", "uart2"],
                "wires": [["gpio1", "gpio2"]],
                "links": [["uart0", "uart1"]]
            }"#,
        )
        .expect("spec")
    }

    #[test]
    fn default_board_has_gpio_and_uart() {
        let board = SimulatedBoard::new(&BoardSpec::default()).expect("board");
        assert!(board.resolves(&id("gpio0"), ResourceClass::Gpio));
        assert!(board.resolves(&id("gpio27"), ResourceClass::Gpio));
        assert!(!board.resolves(&id("gpio28"), ResourceClass::Gpio));
        assert!(board.resolves(&id("uart3"), ResourceClass::Uart));
        assert!(!board.resolves(&id("uart0"), ResourceClass::Gpio));
    }

    #[test]
    fn wired_lines_share_a_level() {
        let board = SimulatedBoard::new(&spec()).expect("board");
        board.write_pin(&id("gpio1"), Level::High).expect("write");
        assert_eq!(board.read_pin(&id("gpio2")).expect("read"), Level::High);
        assert_eq!(board.read_pin(&id("gpio3")).expect("read"), Level::Low);
    }

    #[test]
    fn linked_uarts_cross_connect() {
        let board = SimulatedBoard::new(&spec()).expect("board");
        board.write_serial(&id("uart0"), b"ping").expect("write");
        assert_eq!(board.drain_serial(&id("uart0")).expect("drain"), b"");
        assert_eq!(board.drain_serial(&id("uart1")).expect("drain"), b"ping");
        assert_eq!(board.drain_serial(&id("uart1")).expect("drain"), b"");
    }

    #[test]
    fn unlinked_uart_is_loopback() {
        let board = SimulatedBoard::new(&spec()).expect("board");
        board.write_serial(&id("uart2"), b"echo").expect("write");
        assert_eq!(board.drain_serial(&id("uart2")).expect("drain"), b"echo");
    }

    #[test]
    fn faults_surface_as_hardware_errors() {
        let board = SimulatedBoard::new(&spec()).expect("board");
        board.set_fault(&id("gpio3"), true);
        let err = board.read_pin(&id("gpio3")).expect_err("fault");
        assert_eq!(err.kind(), ErrorKind::Hardware);
        board.set_fault(&id("gpio3"), false);
        board.read_pin(&id("gpio3")).expect("cleared");
    }

    #[test]
    fn configure_serial_records_settings() {
        let board = SimulatedBoard::new(&spec()).expect("board");
        assert_eq!(board.serial_settings(&id("uart0")), None);
        let settings = SerialSettings {
            baud_rate: 115_200,
            ..SerialSettings::default()
        };
        board.configure_serial(&id("uart0"), &settings).expect("configure");
        assert_eq!(board.serial_settings(&id("uart0")), Some(settings));
    }

    #[test]
    fn board_rejects_unknown_wire_and_duplicate_ids() {
        let err = SimulatedBoard::new(
            &BoardSpec::from_json(r#"{"gpio": ["gpio1"], "wires": [["gpio1", "gpio9"]]}"#)
                .expect("spec"),
        )
        .expect_err("unknown wire end");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = SimulatedBoard::new(
            &BoardSpec::from_json(r#"{"gpio": ["x"], "uart": ["x"]}"#).expect("spec"),
        )
        .expect_err("duplicate id");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn board_spec_rejects_unknown_fields() {
        let err = BoardSpec::from_json(r#"{"pins": []}"#).expect_err("unknown field");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
