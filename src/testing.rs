//! Recording fakes of the provider and transport seams for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{EicSshError, Result};
use crate::provider::{AddressFilter, InstanceConnectApi, InstanceRecord, PushRequest};
use crate::transport::{CommandOutput, Transport, TransportAuth};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    DescribeByFilter(AddressFilter, String),
    DescribeById(String),
    Push(PushRequest),
}

/// In-memory provider that records every call
#[derive(Default)]
pub struct FakeApi {
    instances: Vec<InstanceRecord>,
    matches: Vec<(AddressFilter, String, InstanceRecord)>,
    push_rejection: Mutex<Option<String>>,
    push_stalled: AtomicBool,
    calls: Mutex<Vec<ApiCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `instance_id` known to lookups by id
    pub fn with_instance(mut self, instance_id: &str, zone: &str) -> Self {
        self.instances.push(InstanceRecord::new(instance_id, zone));
        self
    }

    /// Return `record` for lookups of `value` under `filter`
    pub fn with_match(
        mut self,
        filter: AddressFilter,
        value: &str,
        record: InstanceRecord,
    ) -> Self {
        self.matches.push((filter, value.to_string(), record));
        self
    }

    /// Fail subsequent pushes with `reason`, or accept them again with `None`
    pub fn reject_pushes(&self, reason: Option<&str>) {
        *self.push_rejection.lock().unwrap() = reason.map(str::to_string);
    }

    /// Leave subsequent pushes hanging until `false` is set again
    pub fn stall_pushes(&self, stalled: bool) {
        self.push_stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::Push(_)))
            .count()
    }

    pub fn lookup_count(&self) -> usize {
        self.calls().len() - self.push_count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InstanceConnectApi for FakeApi {
    async fn describe_instances_by_filter(
        &self,
        filter: AddressFilter,
        value: &str,
    ) -> Result<Vec<InstanceRecord>> {
        self.record(ApiCall::DescribeByFilter(filter, value.to_string()));
        Ok(self
            .matches
            .iter()
            .filter(|(f, v, _)| *f == filter && v == value)
            .map(|(_, _, record)| record.clone())
            .collect())
    }

    async fn describe_instances_by_id(&self, instance_id: &str) -> Result<Vec<InstanceRecord>> {
        self.record(ApiCall::DescribeById(instance_id.to_string()));
        Ok(self
            .instances
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn send_ssh_public_key(&self, request: &PushRequest) -> Result<()> {
        self.record(ApiCall::Push(request.clone()));
        if self.push_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.push_rejection.lock().unwrap().clone() {
            Some(reason) => Err(EicSshError::provider(reason)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecCall {
    pub command: String,
    pub in_data: Option<Vec<u8>>,
    pub auth: TransportAuth,
}

/// Transport that records commands and echoes them back
#[derive(Clone, Default)]
pub struct FakeTransport {
    calls: Arc<Mutex<Vec<ExecCall>>>,
    closed: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exec_command(
        &mut self,
        command: &str,
        in_data: Option<&[u8]>,
        auth: &TransportAuth,
    ) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(ExecCall {
            command: command.to_string(),
            in_data: in_data.map(<[u8]>::to_vec),
            auth: auth.clone(),
        });
        Ok(CommandOutput {
            stdout: format!("ran {}", command),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
