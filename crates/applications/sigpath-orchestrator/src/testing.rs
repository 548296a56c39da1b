//! Recording mocks of the three collaborators
//!
//! Every call lands in a shared `CallLog` so tests can assert ordering and
//! count mutations across broadcasters, control API and directory at once.

use async_trait::async_trait;
use sigpath_core::{
    ApiError, ApiResult, BroadcasterApi, ControlApi, DeviceRecord, DirectoryApi,
    InputStreamRecord, OutputRecord, RedirectFlags, ServiceRecord, SourceId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListStreams { broadcaster: String },
    ListOutputs { broadcaster: String },
    Redirect {
        broadcaster: String,
        output_id: String,
        stream_id: String,
        flags: RedirectFlags,
    },
    SetOutput {
        broadcaster: String,
        output_id: String,
        enabled: bool,
    },
    VmStatus { host: String },
    StartVm { host: String },
    StopVm { host: String },
    StartService { sid: String, ip: String },
    StopService { sid: String, ip: String },
    Reprobe { sid: String },
    RenameSegment { sid: String, ip: String },
    Lookup { sid: String },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::ListStreams { .. } | Call::ListOutputs { .. } | Call::VmStatus { .. } | Call::Lookup { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    /// Index of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

fn unreachable_error(endpoint: &str) -> ApiError {
    ApiError::transport(endpoint, "connection refused")
}

#[derive(Default)]
struct BroadcasterState {
    streams: Vec<String>,
    outputs: Vec<OutputRecord>,
}

pub struct MockBroadcaster {
    name: String,
    log: CallLog,
    state: Mutex<BroadcasterState>,
    failing_redirects: bool,
    ignoring_redirects: bool,
}

impl MockBroadcaster {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            state: Mutex::new(BroadcasterState::default()),
            failing_redirects: false,
            ignoring_redirects: false,
        }
    }

    pub fn with_input(self, stream_id: &str) -> Self {
        self.state.lock().unwrap().streams.push(stream_id.to_string());
        self
    }

    pub fn with_output(self, id: &str, name: &str, stream_id: &str) -> Self {
        self.state.lock().unwrap().outputs.push(OutputRecord {
            id: id.to_string(),
            name: name.to_string(),
            stream_id: stream_id.to_string(),
        });
        self
    }

    /// Redirects answer with a transport error
    pub fn failing_redirects(mut self) -> Self {
        self.failing_redirects = true;
        self
    }

    /// Redirects are acknowledged but never take effect
    pub fn ignoring_redirects(mut self) -> Self {
        self.ignoring_redirects = true;
        self
    }
}

#[async_trait]
impl BroadcasterApi for MockBroadcaster {
    fn address(&self) -> &str {
        &self.name
    }

    fn ui_url(&self) -> String {
        format!("http://{}:4444", self.name)
    }

    async fn list_streams(&self) -> ApiResult<Vec<InputStreamRecord>> {
        self.log.push(Call::ListStreams {
            broadcaster: self.name.clone(),
        });
        let state = self.state.lock().unwrap();
        Ok(state
            .streams
            .iter()
            .map(|id| InputStreamRecord { id: id.clone() })
            .collect())
    }

    async fn list_outputs(&self) -> ApiResult<Vec<OutputRecord>> {
        self.log.push(Call::ListOutputs {
            broadcaster: self.name.clone(),
        });
        Ok(self.state.lock().unwrap().outputs.clone())
    }

    async fn redirect(&self, output_id: &str, stream_id: &str, flags: RedirectFlags) -> ApiResult<()> {
        self.log.push(Call::Redirect {
            broadcaster: self.name.clone(),
            output_id: output_id.to_string(),
            stream_id: stream_id.to_string(),
            flags,
        });
        if self.failing_redirects {
            return Err(unreachable_error(&self.name));
        }
        if !self.ignoring_redirects {
            let mut state = self.state.lock().unwrap();
            if let Some(output) = state.outputs.iter_mut().find(|o| o.id == output_id) {
                output.stream_id = stream_id.to_string();
            }
        }
        Ok(())
    }

    async fn set_output_enabled(&self, output_id: &str, enabled: bool) -> ApiResult<()> {
        self.log.push(Call::SetOutput {
            broadcaster: self.name.clone(),
            output_id: output_id.to_string(),
            enabled,
        });
        Ok(())
    }
}

pub struct MockControl {
    log: CallLog,
    statuses: Mutex<HashMap<String, String>>,
    segment_answer: String,
    unreachable: bool,
}

impl MockControl {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            statuses: Mutex::new(HashMap::new()),
            segment_answer: "Segment names updated successfully".to_string(),
            unreachable: false,
        }
    }

    pub fn with_status(self, host: &str, status: &str) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(host.to_string(), status.to_string());
        self
    }

    pub fn with_segment_answer(mut self, answer: &str) -> Self {
        self.segment_answer = answer.to_string();
        self
    }

    /// Every call fails with a transport error (after being logged)
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn answer(&self, body: &str) -> ApiResult<String> {
        if self.unreachable {
            Err(unreachable_error("control"))
        } else {
            Ok(body.to_string())
        }
    }
}

#[async_trait]
impl ControlApi for MockControl {
    async fn vm_status(&self, hostname: &str) -> ApiResult<String> {
        self.log.push(Call::VmStatus {
            host: hostname.to_string(),
        });
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(hostname)
            .cloned()
            .unwrap_or_else(|| "TERMINATED".to_string());
        self.answer(&status)
    }

    async fn start_vm(&self, hostname: &str) -> ApiResult<String> {
        self.log.push(Call::StartVm {
            host: hostname.to_string(),
        });
        if !self.unreachable {
            self.statuses
                .lock()
                .unwrap()
                .insert(hostname.to_string(), "RUNNING".to_string());
        }
        self.answer("starting")
    }

    async fn stop_vm(&self, hostname: &str) -> ApiResult<String> {
        self.log.push(Call::StopVm {
            host: hostname.to_string(),
        });
        if !self.unreachable {
            self.statuses
                .lock()
                .unwrap()
                .insert(hostname.to_string(), "TERMINATED".to_string());
        }
        self.answer("stopping")
    }

    async fn start_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.log.push(Call::StartService {
            sid: source_id.to_string(),
            ip: ip.to_string(),
        });
        self.answer("started")
    }

    async fn stop_service(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.log.push(Call::StopService {
            sid: source_id.to_string(),
            ip: ip.to_string(),
        });
        self.answer("stopped")
    }

    async fn reprobe(&self, source_id: &SourceId) -> ApiResult<String> {
        self.log.push(Call::Reprobe {
            sid: source_id.to_string(),
        });
        self.answer("ok")
    }

    async fn rename_segment(&self, source_id: &SourceId, ip: &str) -> ApiResult<String> {
        self.log.push(Call::RenameSegment {
            sid: source_id.to_string(),
            ip: ip.to_string(),
        });
        self.answer(&self.segment_answer)
    }
}

pub struct MockDirectory {
    log: CallLog,
    records: HashMap<String, Vec<ServiceRecord>>,
}

impl MockDirectory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            records: HashMap::new(),
        }
    }

    /// Register `source_id` with a single eligible encoder device
    pub fn with_encoder(self, source_id: &str, callsign: &str, hostname: &str, ip: &str) -> Self {
        self.with_devices(
            source_id,
            callsign,
            vec![DeviceRecord {
                role: "encoder".to_string(),
                name: hostname.to_string(),
                public_ip: Some(ip.to_string()),
            }],
        )
    }

    pub fn with_devices(mut self, source_id: &str, callsign: &str, devices: Vec<DeviceRecord>) -> Self {
        self.records.insert(
            source_id.to_string(),
            vec![ServiceRecord {
                service: callsign.to_string(),
                devices,
            }],
        );
        self
    }
}

#[async_trait]
impl DirectoryApi for MockDirectory {
    async fn lookup(&self, source_id: &SourceId) -> ApiResult<Vec<ServiceRecord>> {
        self.log.push(Call::Lookup {
            sid: source_id.to_string(),
        });
        Ok(self
            .records
            .get(source_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
