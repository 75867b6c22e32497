//! In-memory engine used by tests. Outputs are `<output-name>` byte strings
//! so reassembled results reveal the segment order.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{check_entry_name, Engine, EngineError, EngineFactory, ExecOutput};
use crate::progress::ProgressSink;

/// Behaviour shared by every instance built from one factory
#[derive(Debug, Default, Clone)]
pub struct Script {
    /// Diagnostics returned by a bare `-i <input>` probe
    pub probe_diagnostics: String,
    /// Output name suffixes whose command fails
    pub fail_outputs: HashSet<String>,
    /// Output name suffixes whose command panics mid-encode
    pub panic_outputs: HashSet<String>,
    /// Artificial encode time per output name suffix
    pub delays: HashMap<String, Duration>,
    pub load_fails: bool,
}

impl Script {
    pub fn with_duration(hms: &str) -> Self {
        Self {
            probe_diagnostics: format!(
                "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':\n  Duration: {hms}.00, start: 0.000000, bitrate: 1200 kb/s\n  Stream #0:0(und): Video: h264 (High), yuv420p, 1920x1080, 30 fps\nAt least one output file must be specified\n"
            ),
            ..Default::default()
        }
    }

    fn fails(&self, output: &str) -> bool {
        self.fail_outputs.iter().any(|suffix| output.ends_with(suffix.as_str()))
    }

    fn delay_for(&self, output: &str) -> Option<Duration> {
        self.delays
            .iter()
            .find(|(suffix, _)| output.ends_with(suffix.as_str()))
            .map(|(_, delay)| *delay)
    }

    pub fn failing(mut self, output: &str) -> Self {
        self.fail_outputs.insert(output.to_string());
        self
    }

    pub fn panicking(mut self, output: &str) -> Self {
        self.panic_outputs.insert(output.to_string());
        self
    }

    pub fn delayed(mut self, output: &str, delay: Duration) -> Self {
        self.delays.insert(output.to_string(), delay);
        self
    }
}

/// Counters observed across all instances of a factory
#[derive(Debug, Default)]
pub struct Stats {
    pub loads: AtomicUsize,
    pub terminations: AtomicUsize,
    pub execs: AtomicUsize,
    pub running: AtomicUsize,
    pub peak_running: AtomicUsize,
    pub live_entries: AtomicIsize,
    pub commands: Mutex<Vec<Vec<String>>>,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MemoryEngine {
    script: Arc<Script>,
    stats: Arc<Stats>,
    storage: Option<HashMap<String, Vec<u8>>>,
}

impl MemoryEngine {
    pub fn new(script: Arc<Script>, stats: Arc<Stats>) -> Self {
        Self {
            script,
            stats,
            storage: None,
        }
    }

    fn storage(&mut self) -> Result<&mut HashMap<String, Vec<u8>>, EngineError> {
        self.storage.as_mut().ok_or(EngineError::NotReady)
    }

    fn store(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), EngineError> {
        check_entry_name(name)?;
        let stats = self.stats.clone();
        if self.storage()?.insert(name.to_string(), bytes).is_none() {
            stats.live_entries.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<ExecOutput, EngineError> {
        let input = args
            .windows(2)
            .find(|pair| pair[0] == "-i")
            .map(|pair| pair[1].clone())
            .ok_or_else(|| EngineError::exec("no input", ""))?;
        if !self.storage()?.contains_key(&input) {
            return Err(EngineError::exec(format!("{input}: No such file"), ""));
        }
        if args.len() == 2 {
            return Err(EngineError::exec(
                "At least one output file must be specified",
                self.script.probe_diagnostics.clone(),
            ));
        }

        let output = args.last().cloned().unwrap_or_default();
        if self.script.fails(&output) {
            return Err(EngineError::exec("encoder error", "Conversion failed!"));
        }

        let bytes = if args.iter().any(|a| a == "concat") {
            let list = String::from_utf8_lossy(&self.storage()?[&input]).into_owned();
            let mut joined = Vec::new();
            for name in list.lines().filter_map(|l| l.strip_prefix("file '")) {
                let name = name.trim_end_matches('\'');
                let part = self
                    .storage()?
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EngineError::exec(format!("{name}: missing"), ""))?;
                joined.extend(part);
            }
            joined
        } else {
            format!("<{output}>").into_bytes()
        };
        self.store(&output, bytes)?;
        Ok(ExecOutput::default())
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn load(&mut self) -> Result<(), EngineError> {
        if self.script.load_fails {
            return Err(EngineError::Load("scripted load failure".to_string()));
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.storage.get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn write_input(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        self.store(name, bytes.to_vec())
    }

    async fn exec(
        &mut self,
        args: &[String],
        progress: &ProgressSink,
    ) -> Result<ExecOutput, EngineError> {
        self.storage()?;
        self.stats.execs.fetch_add(1, Ordering::SeqCst);
        self.stats
            .commands
            .lock()
            .expect("commands lock")
            .push(args.to_vec());

        let running = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_running.fetch_max(running, Ordering::SeqCst);

        struct Running<'a>(&'a AtomicUsize);
        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }
        let stats = self.stats.clone();
        let _guard = Running(&stats.running);

        progress.report(0.5);
        let output = args.last().cloned().unwrap_or_default();
        let delay = self.script.delay_for(&output);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if self.script.panic_outputs.iter().any(|suffix| output.ends_with(suffix.as_str())) {
            panic!("scripted engine crash while writing {output}");
        }

        let result = self.run(args);
        if result.is_ok() {
            progress.report(1.0);
        }
        result
    }

    async fn read_output(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.storage()?
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::MissingEntry(name.to_string()))
    }

    async fn delete_entry(&mut self, name: &str) -> Result<(), EngineError> {
        let stats = self.stats.clone();
        if self.storage()?.remove(name).is_some() {
            stats.live_entries.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        if self.storage.take().is_some() {
            self.stats.terminations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct MemoryEngineFactory {
    pub script: Arc<Script>,
    pub stats: Arc<Stats>,
}

impl MemoryEngineFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            stats: Arc::new(Stats::default()),
        }
    }

    /// An instance outside the factory's pool, e.g. the orchestrator's primary engine
    pub fn engine(&self) -> MemoryEngine {
        MemoryEngine::new(self.script.clone(), self.stats.clone())
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn create(&self) -> Box<dyn Engine> {
        Box::new(self.engine())
    }
}
