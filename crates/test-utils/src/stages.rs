use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use framedag::binding::{DerivedObject, TypedValue};
use framedag::engine::StageContext;
use framedag::graph::{OutputSize, PayloadKind, PortSpec, Stage, StageFlags};

/// Shared record of executions and coprocessor calls, in order.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Entries of `log` equal to `name` (executions only).
pub fn executions(log: &ExecutionLog, name: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| *e == name).count()
}

pub fn snapshot(log: &ExecutionLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn clear(log: &ExecutionLog) {
    log.lock().unwrap().clear();
}

/// Handle to change a stage's declared state from the outside.
#[derive(Debug, Clone, Default)]
pub struct StateHandle(Arc<Mutex<String>>);

impl StateHandle {
    pub fn set(&self, state: &str) {
        *self.0.lock().unwrap() = state.to_string();
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

/// A configurable stage that records what happens to it.
///
/// On execution it appends its name to the log, calls every bound
/// coprocessor input when asked to, and fills its outputs with values
/// derived from name, state and inputs.
pub struct TestStage {
    name: String,
    ports: Vec<PortSpec>,
    flags: StageFlags,
    state: StateHandle,
    log: ExecutionLog,
    behaviour: Behaviour,
    call_coprocessors: bool,
    ready: Arc<AtomicBool>,
    size: Option<OutputSize>,
    broadcast_sizes: Arc<Mutex<Vec<OutputSize>>>,
}

impl TestStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: Vec::new(),
            flags: StageFlags::default(),
            state: StateHandle::default(),
            log: new_log(),
            behaviour: Behaviour::Succeed,
            call_coprocessors: false,
            ready: Arc::new(AtomicBool::new(true)),
            size: None,
            broadcast_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn input(mut self, port: &str, kind: PayloadKind) -> Self {
        self.ports.push(PortSpec::input(port, kind));
        self
    }

    pub fn multi_input(mut self, port: &str, kind: PayloadKind) -> Self {
        self.ports.push(PortSpec::input(port, kind).multiple());
        self
    }

    pub fn output(mut self, port: &str, kind: PayloadKind) -> Self {
        self.ports.push(PortSpec::output(port, kind));
        self
    }

    pub fn persistent_output(mut self, port: &str) -> Self {
        self.ports
            .push(PortSpec::output(port, PayloadKind::Image).persistent());
        self
    }

    pub fn private(mut self, port: &str) -> Self {
        self.ports.push(PortSpec::private(port));
        self
    }

    /// Shorthand for an image input named `in` and output named `out`.
    pub fn image_filter(self) -> Self {
        self.input("in", PayloadKind::Image)
            .output("out", PayloadKind::Image)
    }

    pub fn sink(mut self) -> Self {
        self.flags.is_sink = true;
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.flags.is_cacheable = true;
        self
    }

    pub fn boundary(mut self) -> Self {
        self.flags.is_cache_boundary = true;
        self
    }

    pub fn coprocessor_only(mut self) -> Self {
        self.flags.is_coprocessor_only = true;
        self
    }

    pub fn state(self, state: &str) -> Self {
        self.state.set(state);
        self
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn log(mut self, log: &ExecutionLog) -> Self {
        self.log = Arc::clone(log);
        self
    }

    pub fn failing(mut self) -> Self {
        self.behaviour = Behaviour::Fail;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.behaviour = Behaviour::Panic;
        self
    }

    pub fn calling_coprocessors(mut self) -> Self {
        self.call_coprocessors = true;
        self
    }

    pub fn ready_flag(mut self, flag: &Arc<AtomicBool>) -> Self {
        self.ready = Arc::clone(flag);
        self
    }

    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.size = Some(OutputSize::new(width, height));
        self
    }

    /// Sizes received through `set_output_size`.
    pub fn broadcast_sizes(&self) -> Arc<Mutex<Vec<OutputSize>>> {
        Arc::clone(&self.broadcast_sizes)
    }
}

impl Stage for TestStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn flags(&self) -> StageFlags {
        self.flags
    }

    fn declared_state(&self) -> String {
        self.state.get()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn output_size(&self) -> Option<OutputSize> {
        self.size
    }

    fn set_output_size(&mut self, size: OutputSize) {
        self.broadcast_sizes.lock().unwrap().push(size);
        if self.size.is_some() {
            self.size = Some(size);
        }
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        self.log.lock().unwrap().push(self.name.clone());

        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => bail!("{} failed on purpose", self.name),
            Behaviour::Panic => panic!("{} panicked on purpose", self.name),
        }

        let mut seen = Vec::new();
        for spec in self.ports.iter().filter(|p| p.is_input()) {
            for index in 0..ctx.input_count(&spec.name) {
                if ctx.binding(&spec.name, index).is_err() {
                    continue;
                }
                match &spec.kind {
                    PayloadKind::Coprocessor if self.call_coprocessors => {
                        let reply = ctx.call(&spec.name, index, &TypedValue::unit())?;
                        let from = reply.downcast_ref::<String>().cloned().unwrap_or_default();
                        self.log
                            .lock()
                            .unwrap()
                            .push(format!("{}<-{}", self.name, from));
                    }
                    PayloadKind::VolumeHandle => {
                        let digest = ctx
                            .read_volume(&spec.name, index)?
                            .map(|obj| obj.digest().to_string())
                            .unwrap_or_default();
                        seen.push(digest);
                    }
                    _ => {}
                }
            }
        }

        let content = format!("{}|{}|{}", self.name, self.state.get(), seen.join(","));
        for spec in self.ports.iter().filter(|p| p.is_output()) {
            if ctx.binding(&spec.name, 0).is_err() {
                continue;
            }
            match &spec.kind {
                PayloadKind::VolumeHandle => {
                    ctx.write_volume(&spec.name, DerivedObject::new(&content, content.clone()))?;
                }
                PayloadKind::Generic { type_tag } => {
                    ctx.publish_value(&spec.name, TypedValue::new(type_tag.clone(), content.clone()))?;
                }
                PayloadKind::Geometry => {
                    ctx.store_geometry(&spec.name, Arc::new(content.clone()))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invoke(&mut self, entry: &str, _args: &TypedValue) -> Result<TypedValue> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}::{}", self.name, entry));
        Ok(TypedValue::new("reply", self.name.clone()))
    }
}
