//! Sample modules driven by `modbridge demo`
//!
//! Three modules that only know each other through the Bridge: `audio`
//! provides a mixer service and answers volume requests, `chat` owns a replay
//! channel, and `hud` resolves the mixer asynchronously, follows chat and file
//! events, and watches player state. The hud deliberately forgets one
//! subscription so the unload report has something to reclaim.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use eyre::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::bridge::{Bridge, BridgeMetrics};
use crate::config::{BridgeConfig, ChannelOptions};
use crate::lifecycle::{BridgeModule, ModuleContext, ModuleHost, UnloadReport};
use crate::subscription::Subscription;

/// Shared log of what the modules observed, in order
#[derive(Clone, Default)]
pub struct Transcript(Rc<RefCell<Vec<String>>>);

impl Transcript {
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(%line, "Transcript::push: called");
        self.0.borrow_mut().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Everything a demo run produced
pub struct DemoOutcome {
    pub transcript: Vec<String>,
    pub reports: Vec<UnloadReport>,
    pub metrics: BridgeMetrics,
}

/// The service `audio` provides
pub struct Mixer {
    volume: Cell<u64>,
}

impl Mixer {
    pub fn new(volume: u64) -> Self {
        Self {
            volume: Cell::new(volume),
        }
    }

    pub fn volume(&self) -> u64 {
        self.volume.get()
    }

    pub fn play(&self, sound: &str) -> String {
        format!("{} at volume {}", sound, self.volume.get())
    }
}

fn describe(value: Option<&Value>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "absent".to_string())
}

struct AudioModule {
    transcript: Transcript,
    handles: Vec<Subscription>,
}

impl BridgeModule for AudioModule {
    fn id(&self) -> &str {
        "audio"
    }

    fn start(&mut self, ctx: &ModuleContext) -> Result<()> {
        let mixer = Rc::new(Mixer::new(5));
        self.handles.push(ctx.provide("audio", mixer.clone()));

        let weak = Rc::downgrade(&mixer);
        let transcript = self.transcript.clone();
        self.handles.push(ctx.watch("settings.volume", move |change| {
            let Some(mixer) = weak.upgrade() else {
                return;
            };
            if let Some(volume) = change.new_value.as_ref().and_then(Value::as_u64) {
                mixer.volume.set(volume);
                transcript.push(format!("audio: volume set to {}", volume));
            }
        })?);

        let responder = ctx.clone();
        let weak = Rc::downgrade(&mixer);
        self.handles.push(ctx.subscribe("audio:volume", move |request| {
            let volume = weak.upgrade().map(|m| m.volume()).unwrap_or(0);
            responder.reply(request, json!(volume));
        }));

        self.transcript.push("audio: mixer provided");
        Ok(())
    }

    fn stop(&mut self, _ctx: &ModuleContext) -> Result<()> {
        for handle in self.handles.drain(..) {
            handle.dispose();
        }
        Ok(())
    }
}

struct ChatModule {
    transcript: Transcript,
}

impl BridgeModule for ChatModule {
    fn id(&self) -> &str {
        "chat"
    }

    fn start(&mut self, ctx: &ModuleContext) -> Result<()> {
        ctx.create_channel("chat", ChannelOptions::replay(2));
        for line in ["welcome", "rules: be kind", "motd: patch notes are up"] {
            ctx.publish("chat", json!(line));
        }
        self.transcript.push("chat: channel ready with replay 2");
        Ok(())
    }
}

struct HudModule {
    transcript: Transcript,
    handles: Vec<Subscription>,
}

impl BridgeModule for HudModule {
    fn id(&self) -> &str {
        "hud"
    }

    fn start(&mut self, ctx: &ModuleContext) -> Result<()> {
        let transcript = self.transcript.clone();
        self.handles.push(ctx.subscribe("chat", move |message| {
            let sender = message.meta.sender.as_deref().unwrap_or("anonymous");
            transcript.push(format!("hud: chat from {}: {}", sender, message.payload));
        }));

        // Never disposed in stop; the host reclaims it
        let transcript = self.transcript.clone();
        ctx.subscribe("file:*", move |message| {
            transcript.push(format!("hud: {} {}", message.channel, message.payload));
        });

        let transcript = self.transcript.clone();
        self.handles.push(ctx.watch("player", move |change| {
            transcript.push(format!(
                "hud: player now {} (was {}, via {})",
                describe(change.new_value.as_ref()),
                describe(change.old_value.as_ref()),
                change.trigger
            ));
        })?);

        let pending = ctx.use_service::<Mixer>("audio", None);
        let transcript = self.transcript.clone();
        let announcer = ctx.clone();
        self.handles.push(ctx.spawn(async move {
            match pending.await {
                Ok(mixer) => {
                    transcript.push(format!("hud: resolved audio, {}", mixer.play("chime")));
                    announcer.publish("hud:ready", json!(true));
                }
                Err(e) => transcript.push(format!("hud: no audio: {}", e)),
            }
        }));

        self.transcript.push("hud: started");
        Ok(())
    }

    fn stop(&mut self, _ctx: &ModuleContext) -> Result<()> {
        for handle in self.handles.drain(..) {
            handle.dispose();
        }
        Ok(())
    }
}

/// Load the sample modules, drive a short scenario, and unload everything
///
/// Must run inside a `tokio::task::LocalSet`.
pub async fn run_demo(config: BridgeConfig, reverse: bool) -> Result<DemoOutcome> {
    info!(reverse, "Running demo");
    let wait = Some(config.wait_timeout());
    let bridge = Bridge::new(config);
    let transcript = Transcript::default();
    bridge.create_channel("hud:ready", ChannelOptions::replay(1));

    let mut modules: Vec<Box<dyn BridgeModule>> = vec![
        Box::new(AudioModule {
            transcript: transcript.clone(),
            handles: Vec::new(),
        }),
        Box::new(ChatModule {
            transcript: transcript.clone(),
        }),
        Box::new(HudModule {
            transcript: transcript.clone(),
            handles: Vec::new(),
        }),
    ];
    if reverse {
        modules.reverse();
    }

    let mut host = ModuleHost::new(bridge.clone());
    for module in modules {
        host.load(module)?;
        tokio::task::yield_now().await;
    }

    bridge
        .wait_for("hud:ready", wait)
        .await
        .context("HUD never resolved the audio service")?;

    let host_ctx = bridge.scope("host");
    host_ctx.publish("chat", json!("gg"));
    host_ctx.publish("file:saved", json!({"path": "notes.md"}));

    host_ctx.batch(|| -> Result<()> {
        host_ctx.set("player.health", json!(100))?;
        host_ctx.set("player.mana", json!(40))?;
        host_ctx.set("player.name", json!("ada"))?;
        Ok(())
    })?;
    host_ctx.update("player.health", |h| json!(h.and_then(|v| v.as_i64()).unwrap_or(0) - 30))?;
    host_ctx.set("settings.volume", json!(8))?;

    let response = host_ctx
        .request("audio:volume", Value::Null, wait)
        .await
        .context("Audio did not answer the volume request")?;
    transcript.push(format!("host: audio reports volume {}", response.payload));

    let reports = host.unload_all();
    Ok(DemoOutcome {
        transcript: transcript.lines(),
        reports,
        metrics: bridge.metrics(),
    })
}
