//! In-memory fakes for the runtime and health seams (testing only)

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ContainerError;
use crate::health::HealthProbe;
use crate::runtime::{ContainerRuntime, ContainerStatus, RunSpec};
use crate::Result;

#[derive(Debug)]
struct RuntimeState {
    status: ContainerStatus,
    available: bool,
    fail_run: Option<String>,
    fail_stop: bool,
    last_spec: Option<RunSpec>,
    volume: bool,
    run_delay: Duration,
    runs: u32,
    starts: u32,
    stops: u32,
    removes: u32,
    volume_removes: u32,
}

/// Scriptable container runtime that records every call.
#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::with_status(ContainerStatus::Absent)
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: ContainerStatus) -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                status,
                available: true,
                fail_run: None,
                fail_stop: false,
                last_spec: None,
                volume: false,
                run_delay: Duration::ZERO,
                runs: 0,
                starts: 0,
                stops: 0,
                removes: 0,
                volume_removes: 0,
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    /// Make the next `run` fail as if the host were out of resources.
    pub fn fail_run(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().fail_run = Some(reason.into());
    }

    /// Simulate a data volume that outlived its container.
    pub fn with_volume(self) -> Self {
        self.state.lock().unwrap().volume = true;
        self
    }

    /// Make `run` take this long, like a first-time image pull.
    pub fn set_run_delay(&self, delay: Duration) {
        self.state.lock().unwrap().run_delay = delay;
    }

    pub fn fail_stop(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    pub fn status(&self) -> ContainerStatus {
        self.state.lock().unwrap().status
    }

    pub fn last_spec(&self) -> Option<RunSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }

    pub fn runs(&self) -> u32 {
        self.state.lock().unwrap().runs
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> u32 {
        self.state.lock().unwrap().stops
    }

    pub fn removes(&self) -> u32 {
        self.state.lock().unwrap().removes
    }

    pub fn volume_removes(&self) -> u32 {
        self.state.lock().unwrap().volume_removes
    }

    /// Total mutating calls.
    pub fn side_effects(&self) -> u32 {
        let s = self.state.lock().unwrap();
        s.runs + s.starts + s.stops + s.removes + s.volume_removes
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> bool {
        self.state.lock().unwrap().available
    }

    async fn inspect(&self, _name: &str) -> Result<ContainerStatus> {
        let state = self.state.lock().unwrap();
        if !state.available {
            return Err(ContainerError::Capacity("runtime unavailable".to_string()));
        }
        Ok(state.status)
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.runs += 1;
            state.run_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_run.take() {
            return Err(ContainerError::Capacity(reason));
        }
        if state.status != ContainerStatus::Absent {
            return Err(ContainerError::Capacity(format!(
                "container name {} is already in use",
                spec.name
            )));
        }
        if spec.data_volume.is_some() {
            state.volume = true;
        }
        state.status = ContainerStatus::Running;
        state.last_spec = Some(spec.clone());
        Ok(format!("fake-{}", spec.name))
    }

    async fn start(&self, _name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        state.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop(&self, _name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        if state.fail_stop {
            return Err(ContainerError::Runtime("stop refused".to_string()));
        }
        if state.status == ContainerStatus::Running {
            state.status = ContainerStatus::Stopped;
        }
        Ok(())
    }

    async fn remove(&self, _name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.removes += 1;
        state.status = ContainerStatus::Absent;
        Ok(())
    }

    async fn remove_volume(&self, _volume: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.volume_removes += 1;
        state.volume = false;
        Ok(())
    }

    async fn volume_exists(&self, _volume: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().volume)
    }
}

/// Health probe that turns healthy after a fixed number of failures.
#[derive(Debug)]
pub struct FakeProbe {
    failures_before_healthy: Option<u32>,
    attempts: AtomicU32,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self::healthy_after(0)
    }

    pub fn healthy_after(failures: u32) -> Self {
        Self {
            failures_before_healthy: Some(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn never_healthy() -> Self {
        Self {
            failures_before_healthy: None,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _url: &str) -> bool {
        let seen = self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.failures_before_healthy {
            Some(n) => seen >= n,
            None => false,
        }
    }
}
