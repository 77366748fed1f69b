#![allow(dead_code)]

use async_trait::async_trait;
use readygate::config::BootstrapSettings;
use readygate::probe::{
    DependencyDescriptor, DependencyKind, Probe, ProbeErrorKind, ProbeFailure, SharedProbe,
};
use readygate::retry::JitterMode;
use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// What a scripted probe does on one call.
#[derive(Clone, Debug)]
pub enum Step {
    Succeed,
    Fail(ProbeErrorKind),
    /// Never answers; only the caller's deadline ends the attempt.
    Hang,
    /// Answers successfully after the given delay.
    SlowSucceed(Duration),
}

/// In-memory probe that replays a script of outcomes, then repeats `fallback`.
pub struct ScriptedProbe {
    descriptor: DependencyDescriptor,
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(
        name: &str,
        kind: DependencyKind,
        script: impl IntoIterator<Item = Step>,
        fallback: Step,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor: DependencyDescriptor::new(name, kind, vec![format!("mock://{name}")]),
            script: Mutex::new(script.into_iter().collect()),
            fallback: Mutex::new(fallback),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always(name: &str, kind: DependencyKind, step: Step) -> Arc<Self> {
        Self::new(name, kind, Vec::new(), step)
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().expect("fallback lock") = step;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let scripted = self.script.lock().expect("script lock").pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().expect("fallback lock").clone())
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    async fn check(&self, _timeout: Duration) -> Result<(), ProbeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Succeed => Ok(()),
            Step::Fail(kind) => Err(ProbeFailure::new(kind, format!("scripted {kind}"))),
            Step::Hang => std::future::pending().await,
            Step::SlowSucceed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

pub fn shared(probe: &Arc<ScriptedProbe>) -> SharedProbe {
    probe.clone()
}

pub fn descriptors(probes: &[SharedProbe]) -> Vec<DependencyDescriptor> {
    probes
        .iter()
        .map(|probe| probe.descriptor().clone())
        .collect()
}

pub fn bootstrap_settings(timeout: Duration) -> BootstrapSettings {
    BootstrapSettings {
        timeout,
        max_attempts: 5,
        backoff_base: Duration::from_secs(1),
        backoff_ceiling: Duration::from_secs(30),
        jitter: JitterMode::None,
        probe_timeout: Duration::from_secs(2),
        recheck_interval: Duration::from_secs(15),
    }
}

pub fn reserve_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Captures formatted log output in memory.
#[derive(Clone, Default)]
pub struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferWriter {
    pub fn contents(&self) -> String {
        let guard = self.buffer.lock().expect("log buffer lock");
        String::from_utf8_lossy(&guard).into_owned()
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferGuard;

    fn make_writer(&'a self) -> Self::Writer {
        BufferGuard {
            buffer: self.buffer.clone(),
        }
    }
}

pub struct BufferGuard {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for BufferGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.buffer.lock().expect("log buffer lock");
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
