//! Demo host: a tiny scene driven by a fixed-rate tick loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::bail;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use hostlink_core::capability::CapabilityTable;
use hostlink_core::marshal::{Color, Vector3};
use hostlink_core::protocol::CommandResult;
use hostlink_gateway::{CommandRegistry, Dispatcher, InboundMessage};

#[derive(Debug, Clone, Serialize)]
pub struct SceneObject {
    pub name: String,
    pub position: Vector3,
    pub color: Color,
}

#[derive(Debug)]
pub struct Scene {
    pub camera_position: Vector3,
    pub light_color: Color,
    pub time_scale: f64,
    pub paused: bool,
    pub frame: i64,
    pub elapsed: f64,
    pub objects: Vec<SceneObject>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera_position: Vector3 {
                x: 0.0,
                y: 1.0,
                z: -10.0,
            },
            light_color: Color::default(),
            time_scale: 1.0,
            paused: false,
            frame: 0,
            elapsed: 0.0,
            objects: Vec::new(),
        }
    }
}

impl Scene {
    fn advance(&mut self, dt: Duration) {
        if self.paused {
            return;
        }
        self.frame += 1;
        self.elapsed += dt.as_secs_f64() * self.time_scale;
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.objects
            .iter()
            .position(|o| o.name.eq_ignore_ascii_case(name))
    }
}

/// Scene properties reachable through `get_property` / `set_property`.
pub fn capabilities() -> CapabilityTable<Scene> {
    let mut table = CapabilityTable::new();
    table
        .register(
            "camera.position",
            |s: &Scene| s.camera_position,
            |s, v| s.camera_position = v,
        )
        .register("light.color", |s: &Scene| s.light_color, |s, v| s.light_color = v)
        .register("time_scale", |s: &Scene| s.time_scale, |s, v: f64| {
            s.time_scale = v.max(0.0)
        })
        .register("paused", |s: &Scene| s.paused, |s, v| s.paused = v)
        .register_read_only("frame", |s: &Scene| s.frame)
        .register_read_only("elapsed", |s: &Scene| s.elapsed)
        .register_read_only("object_count", |s: &Scene| s.objects.len() as i64);
    table
}

/// Scene commands on top of the built-ins.
pub fn register_commands(registry: &mut CommandRegistry<Scene>) {
    registry
        .register("spawn_object", |scene, ctx, env| {
            let name: String = env.param("name")?;
            if scene.find(&name).is_some() {
                bail!("Object '{name}' already exists");
            }
            let object = SceneObject {
                name,
                position: env.param_or("position", Vector3::default())?,
                color: env.param_or("color", Color::default())?,
            };
            let data = serde_json::to_value(&object)?;
            // Announce before mutating so a failed broadcast leaves the scene untouched.
            ctx.broadcaster().broadcast_event("object_spawned", data.clone())?;
            scene.objects.push(object);
            Ok(CommandResult::ok_with("Object spawned", data))
        })
        .register("move_object", |scene, _, env| {
            let name: String = env.param("name")?;
            let position: Vector3 = env.param("position")?;
            let Some(index) = scene.find(&name) else {
                bail!("No object named '{name}'");
            };
            scene.objects[index].position = position;
            Ok(CommandResult::ok_with(
                "Object moved",
                serde_json::to_value(&scene.objects[index])?,
            ))
        })
        .register("delete_object", |scene, _, env| {
            let name: String = env.param("name")?;
            let Some(index) = scene.find(&name) else {
                bail!("No object named '{name}'");
            };
            let removed = scene.objects.remove(index);
            Ok(CommandResult::ok(format!("Deleted {}", removed.name)))
        })
        .register("list_objects", |scene, _, _| {
            Ok(CommandResult::ok_with(
                format!("{} objects", scene.objects.len()),
                json!({ "objects": scene.objects }),
            ))
        });
}

/// Tick until `stop` is set: run queued commands, drain client messages, advance the scene.
pub fn run(
    dispatcher: Dispatcher<Scene>,
    mut inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    tick: Duration,
    stop: &AtomicBool,
) {
    let mut scene = Scene::default();
    let mut last = Instant::now();
    info!(tick_ms = tick.as_millis() as u64, "Host loop started");

    while !stop.load(Ordering::SeqCst) {
        let ran = dispatcher.tick(&mut scene);
        if ran > 0 {
            debug!(commands = ran, frame = scene.frame, "Tick");
        }

        if let Some(rx) = inbound.as_mut() {
            while let Ok(message) = rx.try_recv() {
                info!(conn_id = %message.conn_id, text = %message.text, "Client message");
            }
        }

        let now = Instant::now();
        scene.advance(now - last);
        last = now;
        std::thread::sleep(tick);
    }

    info!(frame = scene.frame, "Host loop stopped");
}
