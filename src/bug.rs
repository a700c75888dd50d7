//! The `Error` record `spec.md` §3/§6/§7 describes: one bug report tying a
//! supervisor's unclean exit to the schedule and event trace that produced
//! it. Grounded on `cluster.py`'s `Error` dataclass and `Error.log_error`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::FuzzerType;
use crate::event::Event;
use crate::schedule::Schedule;

/// One target-process failure observed during a cluster run.
///
/// `states` is populated by the driver after the guider has scored the
/// trace (§4.7: "`error.states = guider.get_states(event_trace)`"), so it
/// starts empty and is filled in just before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub name: String,
    pub run_id: usize,
    pub fuzzer: FuzzerType,
    pub returncode: Option<i32>,
    pub stderr: String,
    pub stdout: String,
    pub schedule: Schedule,
    pub event_trace: Vec<Event>,
    #[serde(default)]
    pub states: Vec<serde_json::Value>,
}

impl ErrorRecord {
    /// Builds the taxonomy name for a server's unclean exit: `ServerException_i`
    /// for a positive non-zero code, `NegativeServerReturnCode_i` for a
    /// negative one (the subprocess never ran to completion), per §7.
    pub fn for_server(index: usize, returncode: Option<i32>) -> String {
        Self::exit_name("Server", index, returncode)
    }

    pub fn for_client(index: usize, returncode: Option<i32>) -> String {
        Self::exit_name("Client", index, returncode)
    }

    fn exit_name(kind: &str, index: usize, returncode: Option<i32>) -> String {
        match returncode {
            Some(rc) if rc < 0 => format!("Negative{kind}ReturnCode_{index}"),
            _ => format!("{kind}Exception_{index}"),
        }
    }

    /// Persists this record to
    /// `dir/<fuzzer>_<run_id>_<name>.json`, per `spec.md` §6.
    pub fn persist(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_{}_{}.json", self.fuzzer.as_str(), self.run_id, self.name));
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_returncode_yields_exception_name() {
        assert_eq!(ErrorRecord::for_server(2, Some(1)), "ServerException_2");
    }

    #[test]
    fn negative_returncode_yields_negative_name() {
        assert_eq!(ErrorRecord::for_server(2, Some(-1)), "NegativeServerReturnCode_2");
    }

    #[test]
    fn missing_returncode_defaults_to_exception_name() {
        assert_eq!(ErrorRecord::for_client(0, None), "ClientException_0");
    }

    #[test]
    fn persists_one_file_per_error() {
        let dir = tempfile::tempdir().unwrap();
        let record = ErrorRecord {
            name: "ServerException_1".to_string(),
            run_id: 7,
            fuzzer: FuzzerType::ModelFuzz,
            returncode: Some(1),
            stderr: String::new(),
            stdout: String::new(),
            schedule: Vec::new(),
            event_trace: Vec::new(),
            states: Vec::new(),
        };
        record.persist(dir.path()).unwrap();
        assert!(dir.path().join("modelfuzz_7_ServerException_1.json").exists());
    }
}
