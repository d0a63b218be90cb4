//! The simulation worker.
//!
//! [`Worker`] owns the current scene snapshot and surrogate model and turns
//! commands into responses. [`WorkerHandle`] runs a `Worker` on its own
//! thread behind a pair of channels. Commands queued while the worker is busy
//! are drained as one batch. Within a run of consecutive scene updates the
//! newest one that applies wins and the older ones are superseded.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::*;

use crate::engine::Engine;
use crate::protocol::{Command, ErrorCode, Response};
use crate::scene::{SceneGraph, SerializedSceneGraph};
use crate::settings::Settings;
use crate::surrogate::SurrogateModel;

#[cfg(test)]
mod tests {

    use super::*;
    use serde_json::json;

    fn wire(version: u64) -> SerializedSceneGraph {
        serde_json::from_value(json!({
            "version": version,
            "devices": [
                { "id": "laser", "type": "emitter", "position": [0.0, 0.0, 0.0],
                  "normal": [1.0, 0.0, 0.0] },
                { "id": "eye", "type": "sensor", "position": [1.0, 0.0, 0.0],
                  "normal": [-1.0, 0.0, 0.0] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn tick_without_scene() {
        let mut worker = Worker::new(Settings::default());
        let responses = worker.handle(Command::tick());
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].error_code(), Some(ErrorCode::NoScene));
    }

    #[test]
    fn update_then_tick() {
        let mut worker = Worker::new(Settings::default());
        assert!(worker.handle(Command::UpdateScene(wire(1))).is_empty());
        let responses = worker.handle(Command::tick());
        match &responses[..] {
            [Response::WorldState(world)] => {
                assert_eq!(world.scene_version, 1);
                assert!((world.sensor_intensity("eye") - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected responses {:?}", other),
        }
    }

    #[test]
    fn stale_versions_are_rejected() {
        let mut worker = Worker::new(Settings::default());
        worker.handle(Command::UpdateScene(wire(5)));
        for version in [5, 2] {
            let responses = worker.handle(Command::UpdateScene(wire(version)));
            assert_eq!(responses[0].error_code(), Some(ErrorCode::StaleSceneVersion));
        }
        assert_eq!(worker.scene().map(|s| s.version), Some(5));
    }

    fn broken(version: u64) -> SerializedSceneGraph {
        let mut wire = wire(version);
        wire.devices[1].device_type = "laserCannon".to_string();
        wire
    }

    fn versions(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .map(|step| match step {
                Step::SceneUpdates(run) => {
                    let v: Vec<_> = run.iter().map(|w| w.version.to_string()).collect();
                    format!("scenes[{}]", v.join(","))
                }
                Step::Other(command) => command.name().to_string(),
            })
            .collect()
    }

    #[test]
    fn batches_group_consecutive_updates() {
        let batch = vec![
            Command::UpdateScene(wire(1)),
            Command::UpdateScene(wire(2)),
            Command::tick(),
            Command::UpdateScene(wire(3)),
            Command::SetSurrogateModel(vec![]),
            Command::UpdateScene(wire(4)),
            Command::UpdateScene(wire(5)),
        ];
        assert_eq!(
            versions(&group_updates(batch)),
            ["scenes[1,2]", "TICK", "scenes[3]", "SET_SURROGATE_MODEL", "scenes[4,5]"]
        );
    }

    #[test]
    fn newest_valid_update_in_a_batch_wins() {
        let mut worker = Worker::new(Settings::default());
        let responses = worker.handle_batch(vec![
            Command::UpdateScene(wire(1)),
            Command::UpdateScene(wire(2)),
            Command::UpdateScene(wire(3)),
        ]);
        assert!(responses.is_empty(), "{:?}", responses);
        assert_eq!(worker.scene().map(|s| s.version), Some(3));
    }

    #[test]
    fn broken_update_falls_back_to_earlier_one_in_batch() {
        let mut worker = Worker::new(Settings::default());
        let responses = worker.handle_batch(vec![
            Command::UpdateScene(wire(1)),
            Command::UpdateScene(broken(2)),
            Command::tick(),
        ]);
        assert_eq!(responses.len(), 2, "{:?}", responses);
        assert_eq!(responses[0].error_code(), Some(ErrorCode::UnknownDeviceType));
        match &responses[1] {
            Response::WorldState(world) => assert_eq!(world.scene_version, 1),
            other => panic!("unexpected response {:?}", other),
        }
        assert_eq!(worker.scene().map(|s| s.version), Some(1));
    }

    #[test]
    fn stale_update_does_not_hide_newer_one_in_batch() {
        let mut worker = Worker::new(Settings::default());
        worker.handle(Command::UpdateScene(wire(5)));
        let responses = worker.handle_batch(vec![
            Command::UpdateScene(wire(6)),
            Command::UpdateScene(wire(3)),
        ]);
        assert_eq!(responses.len(), 1, "{:?}", responses);
        assert_eq!(responses[0].error_code(), Some(ErrorCode::StaleSceneVersion));
        assert_eq!(worker.scene().map(|s| s.version), Some(6));
    }

    #[test]
    fn rejections_are_reported_in_submission_order() {
        let mut worker = Worker::new(Settings::default());
        worker.handle(Command::UpdateScene(wire(5)));
        let responses = worker.handle_batch(vec![
            Command::UpdateScene(broken(6)),
            Command::UpdateScene(wire(4)),
        ]);
        let codes: Vec<_> = responses.iter().map(Response::error_code).collect();
        assert_eq!(
            codes,
            [Some(ErrorCode::UnknownDeviceType), Some(ErrorCode::StaleSceneVersion)]
        );
        assert_eq!(worker.scene().map(|s| s.version), Some(5));
    }

    #[test]
    fn bad_surrogate_keeps_previous_model() {
        let mut worker = Worker::new(Settings::default());
        let model = SurrogateModel::default();
        assert!(worker.handle(Command::SetSurrogateModel(model.to_bytes())).is_empty());
        assert!(worker.has_surrogate());
        let responses = worker.handle(Command::SetSurrogateModel(b"junk".to_vec()));
        assert_eq!(responses[0].error_code(), Some(ErrorCode::SurrogateLoadFailed));
        assert!(worker.has_surrogate());
    }
}

/// Single-threaded command processor.
#[derive(Debug)]
pub struct Worker {
    settings: Settings,
    scene: Option<SceneGraph>,
    surrogate: Option<SurrogateModel>,
}

impl Worker {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            scene: None,
            surrogate: None,
        }
    }

    /// The last successfully applied scene.
    pub fn scene(&self) -> Option<&SceneGraph> {
        self.scene.as_ref()
    }

    pub fn has_surrogate(&self) -> bool {
        self.surrogate.is_some()
    }

    /// Handles a batch of queued commands in order. Each run of consecutive
    /// scene updates goes through [`Worker::apply_newest`].
    pub fn handle_batch(&mut self, commands: Vec<Command>) -> Vec<Response> {
        let mut responses = Vec::new();
        for step in group_updates(commands) {
            match step {
                Step::SceneUpdates(run) => responses.extend(self.apply_newest(run)),
                Step::Other(command) => responses.extend(self.handle(command)),
            }
        }
        responses
    }

    /// Tries the updates newest first and stops at the first one that
    /// applies. Updates rejected on the way are reported in submission order;
    /// those older than the applied one are superseded without a response.
    fn apply_newest(&mut self, run: Vec<SerializedSceneGraph>) -> Vec<Response> {
        let total = run.len();
        let mut rejected = Vec::new();
        for (tried, wire) in run.into_iter().rev().enumerate() {
            let errors = self.update_scene(wire);
            if errors.is_empty() {
                let superseded = total - tried - 1;
                if superseded > 0 {
                    debug!("Worker: {} queued scene updates superseded", superseded);
                }
                break;
            }
            rejected.extend(errors);
        }
        rejected.reverse();
        rejected
    }

    pub fn handle(&mut self, command: Command) -> Vec<Response> {
        trace!("Worker: handling {}", command.name());
        match command {
            Command::UpdateScene(wire) => self.update_scene(wire),
            Command::SetSurrogateModel(bytes) => self.set_surrogate(bytes),
            Command::Tick(_) => self.tick(),
        }
    }

    fn update_scene(&mut self, wire: SerializedSceneGraph) -> Vec<Response> {
        if let Some(current) = &self.scene {
            if wire.version <= current.version {
                warn!(
                    "Worker: rejecting scene v{}, current is v{}",
                    wire.version, current.version
                );
                return vec![Response::error(
                    ErrorCode::StaleSceneVersion,
                    format!(
                        "Scene version {} is not newer than the current version {}",
                        wire.version, current.version
                    ),
                )];
            }
        }

        match SceneGraph::from_serialized(wire, &self.settings) {
            Ok(scene) => {
                info!(
                    "Worker: applied scene v{} with {} devices",
                    scene.version,
                    scene.devices.len()
                );
                self.scene = Some(scene);
                Vec::new()
            }
            Err(e) => {
                warn!("Worker: rejected scene: {}", e);
                vec![Response::error(e.code(), e.to_string())]
            }
        }
    }

    fn set_surrogate(&mut self, bytes: Vec<u8>) -> Vec<Response> {
        match SurrogateModel::from_bytes(&bytes) {
            Ok(model) => {
                info!("Worker: loaded surrogate model with {} records", model.records.len());
                self.surrogate = Some(model);
                Vec::new()
            }
            Err(e) => {
                warn!("Worker: surrogate load failed, keeping previous model: {}", e);
                vec![Response::error(e.code(), e.to_string())]
            }
        }
    }

    fn tick(&self) -> Vec<Response> {
        let Some(scene) = &self.scene else {
            return vec![Response::error(
                ErrorCode::NoScene,
                "No scene has been loaded",
            )];
        };

        let world = Engine::tick(scene, self.surrogate.as_ref());
        let mut responses = Vec::new();
        if let Some(diagnostics) = &world.diagnostics {
            if !diagnostics.is_clean() {
                debug!("Worker: tick on v{} reported issues", scene.version);
                responses.push(Response::Diagnostic(diagnostics.clone()));
            }
        }
        responses.insert(0, Response::WorldState(world));
        responses
    }
}

/// One unit of work in a drained batch.
#[derive(Debug)]
enum Step {
    SceneUpdates(Vec<SerializedSceneGraph>),
    Other(Command),
}

/// Splits a batch into runs of consecutive scene updates and everything else.
fn group_updates(commands: Vec<Command>) -> Vec<Step> {
    let mut steps: Vec<Step> = Vec::with_capacity(commands.len());
    for command in commands {
        match command {
            Command::UpdateScene(wire) => match steps.last_mut() {
                Some(Step::SceneUpdates(run)) => run.push(wire),
                _ => steps.push(Step::SceneUpdates(vec![wire])),
            },
            other => steps.push(Step::Other(other)),
        }
    }
    steps
}

/// A [`Worker`] running on its own thread.
///
/// Dropping the handle closes the command channel and joins the thread.
pub struct WorkerHandle {
    command_tx: Option<Sender<Command>>,
    response_rx: Receiver<Response>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(settings: Settings) -> Result<Self> {
        info!("WorkerHandle: spawning worker thread");
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let worker = Worker::new(settings);

        let thread_handle = thread::Builder::new()
            .name("polarcraft-worker".to_string())
            .spawn(move || {
                if let Err(e) = worker_thread_main(worker, command_rx, response_tx) {
                    error!("Worker thread error: {:#}", e);
                }
            })
            .context("Failed to spawn worker thread")?;

        Ok(Self {
            command_tx: Some(command_tx),
            response_rx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .as_ref()
            .ok_or_else(|| anyhow!("Worker command channel is closed"))?
            .send(command)
            .context("Failed to send command to worker")
    }

    /// Blocks for the next response.
    pub fn recv(&self) -> Result<Response> {
        self.response_rx
            .recv()
            .context("Worker response channel closed")
    }

    /// Waits up to `timeout` for the next response; `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Response>> {
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("Worker response channel closed")),
        }
    }

    pub fn try_recv(&self) -> Option<Response> {
        self.response_rx.try_recv().ok()
    }

    /// Closes the command channel, waits for queued commands to finish and
    /// returns every response not yet received.
    pub fn shutdown(mut self) -> Vec<Response> {
        self.join();
        self.response_rx.try_iter().collect()
    }

    fn join(&mut self) {
        drop(self.command_tx.take());
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("Worker thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        debug!("WorkerHandle dropped");
        self.join();
    }
}

/// Blocks for one command, then drains whatever else is queued and handles
/// the lot as a batch.
fn worker_thread_main(
    mut worker: Worker,
    command_rx: Receiver<Command>,
    response_tx: Sender<Response>,
) -> Result<()> {
    debug!("Worker: starting command loop");

    loop {
        let first = match command_rx.recv() {
            Ok(command) => command,
            Err(_) => {
                info!("Worker: command channel closed, shutting down");
                return Ok(());
            }
        };

        let mut batch = vec![first];
        let mut disconnected = false;
        loop {
            match command_rx.try_recv() {
                Ok(command) => batch.push(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        for response in worker.handle_batch(batch) {
            response_tx
                .send(response)
                .context("Failed to send response to host")?;
        }

        if disconnected {
            info!("Worker: command channel disconnected, shutting down");
            return Ok(());
        }
    }
}
