use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::sequence::Condition;

// -----------------------------------------------------------------------------
// TRIGGER SINK INTERFACE
// -----------------------------------------------------------------------------

/// Channel stamping event codes into the simultaneously recorded data.
/// `send` is fire-and-forget: it must return quickly and leave no line
/// asserted (pulse semantics belong to the implementation).
pub trait TriggerSink: Send {
    fn send(&mut self, code: u8) -> Result<(), TriggerError>;
}

/// Condition → code table plus the block-framing codes. Every concrete
/// condition maps to exactly one code.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggerCodes {
    pub sound: u8,
    pub deviant: u8,
    pub omission: u8,
    pub task_start: u8,
    pub task_end: u8,
}

impl TriggerCodes {
    pub fn code(&self, condition: Condition) -> u8 {
        match condition {
            Condition::Sound => self.sound,
            Condition::Deviant => self.deviant,
            Condition::Omission => self.omission,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggersConfig {
    /// One of "serial" or "mock".
    pub kind: String,
    /// Port path for the serial kind, e.g. "/dev/ttyUSB0".
    pub port: Option<String>,
    pub codes: TriggerCodes,
}

pub fn create_trigger(config: &TriggersConfig) -> Result<Box<dyn TriggerSink>, TriggerError> {
    match config.kind.as_str() {
        "serial" => {
            let port = config.port.as_deref().unwrap_or("/dev/ttyUSB0");
            Ok(Box::new(SerialTrigger::open(port)?))
        }
        _ => Ok(Box::new(MockTrigger::new())),
    }
}

// -----------------------------------------------------------------------------
// SERIAL TRIGGER
// -----------------------------------------------------------------------------

/// Writes one byte per code to a serial character device. The receiving
/// hardware interprets the byte and de-asserts on its own.
pub struct SerialTrigger {
    port: File,
}

impl SerialTrigger {
    pub fn open(path: &str) -> Result<Self, TriggerError> {
        let port = OpenOptions::new().write(true).open(path)?;
        Ok(Self { port })
    }
}

impl TriggerSink for SerialTrigger {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        self.port.write_all(&[code])?;
        self.port.flush()?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// MOCK TRIGGER
// -----------------------------------------------------------------------------

/// Records (code, time) pairs instead of touching hardware. Used by tests
/// and by runs without a trigger device attached.
pub struct MockTrigger {
    records: Arc<Mutex<Vec<(u8, Instant)>>>,
}

impl MockTrigger {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle onto the recorded sends.
    pub fn records(&self) -> Arc<Mutex<Vec<(u8, Instant)>>> {
        Arc::clone(&self.records)
    }
}

impl Default for MockTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSink for MockTrigger {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        self.records
            .lock()
            .expect("trigger record lock poisoned")
            .push((code, Instant::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_codes_map_one_to_one() {
        let codes = TriggerCodes {
            sound: 1,
            deviant: 3,
            omission: 2,
            task_start: 8,
            task_end: 9,
        };
        assert_eq!(codes.code(Condition::Sound), 1);
        assert_eq!(codes.code(Condition::Deviant), 3);
        assert_eq!(codes.code(Condition::Omission), 2);
    }

    #[test]
    fn mock_trigger_records_in_order() {
        let mut trigger = MockTrigger::new();
        let records = trigger.records();
        trigger.send(8).unwrap();
        trigger.send(1).unwrap();
        trigger.send(9).unwrap();
        let sent: Vec<u8> = records.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(sent, vec![8, 1, 9]);
    }
}
