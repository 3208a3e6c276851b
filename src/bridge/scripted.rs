//! Scripted bridge double that records every invocation

use super::traits::{BridgeOutput, BridgeRunner};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How the scripted bridge answers one invocation
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(String),
    Unlaunchable,
    Hang,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Ok(stdout.to_string())
    }

    pub fn fail(stderr: &str) -> Self {
        Reply::Fail(stderr.to_string())
    }
}

type Script = Box<dyn Fn(&[String]) -> Reply + Send + Sync>;

pub struct ScriptedBridge {
    script: Script,
    calls: Mutex<Vec<(Instant, Vec<String>)>>,
}

impl ScriptedBridge {
    pub fn new(script: impl Fn(&[String]) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every argument vector seen so far, in order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// Number of invocations whose arguments contain `word`
    pub fn count(&self, word: &str) -> usize {
        self.calls().iter().filter(|args| args.iter().any(|a| a == word)).count()
    }
}

/// `devices` output listing the given ids as ready
pub fn device_listing(ids: &[&str]) -> String {
    let mut out = String::from("List of devices attached\n");
    for id in ids {
        out.push_str(&format!("{}\tdevice\n", id));
    }
    out
}

#[async_trait]
impl BridgeRunner for ScriptedBridge {
    async fn invoke(&self, args: &[String]) -> std::io::Result<BridgeOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), args.to_vec()));

        match (self.script)(args) {
            Reply::Ok(stdout) => Ok(BridgeOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            }),
            Reply::Fail(stderr) => Ok(BridgeOutput {
                status: Some(1),
                stdout: String::new(),
                stderr,
            }),
            Reply::Unlaunchable => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scripted bridge unavailable",
            )),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(BridgeOutput::default())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
