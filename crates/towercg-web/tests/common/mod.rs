#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use towercg_core::ServerConfig;
use towercg_plugins::{CommandTable, Plugin, PluginContext};
use towercg_web::Envelope;

pub fn config(dir: &TempDir) -> ServerConfig {
    let mut config = ServerConfig::new(dir.path());
    config.http.host = "127.0.0.1".into();
    config.http.port = 0;
    config
}

/// Next queued frame, decoded
pub fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<Envelope> {
    rx.try_recv()
        .ok()
        .map(|text| serde_json::from_str(&text).unwrap())
}

/// Owns a local `foo` command that reports which plugin answered.
pub struct Owner(pub &'static str);

#[async_trait]
impl Plugin for Owner {
    fn name(&self) -> &str {
        self.0
    }

    fn register_commands(&self, commands: &mut CommandTable, _ctx: &PluginContext) {
        commands.register_sync("foo", |ctx, _| Ok(Some(json!({"owner": ctx.name().as_str()}))));
    }
}

/// A command that blocks until released.
pub struct Slow {
    pub release: Arc<Notify>,
    pub finished: Arc<AtomicBool>,
}

#[async_trait]
impl Plugin for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn register_commands(&self, commands: &mut CommandTable, _ctx: &PluginContext) {
        let release = self.release.clone();
        let finished = self.finished.clone();
        commands.register("wait", move |_, _: Value| {
            let release = release.clone();
            let finished = finished.clone();
            async move {
                release.notified().await;
                finished.store(true, Ordering::SeqCst);
                Ok(Some(json!({"done": true})))
            }
        });
    }
}

/// Fails to initialize.
pub struct Broken;

#[async_trait]
impl Plugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn initialize(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        anyhow::bail!("camera not found")
    }
}
