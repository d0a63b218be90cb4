use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::*;

use polarcraft::engine::Engine;
use polarcraft::powers::Powers;
use polarcraft::protocol::{self, Command, ErrorCode, Response};
use polarcraft::scene::{self, SceneGraph};
use polarcraft::settings::{self, CliArgs, Commands, Settings, SweepKind};
use polarcraft::surrogate::SurrogateModel;
use polarcraft::sweep;
use polarcraft::thin_film::{self, ThinFilmStack};
use polarcraft::worker::WorkerHandle;


fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let settings = settings::load_config(&args)?;
    info!("{}", settings);

    match &args.command {
        Commands::Run {
            scene,
            ticks,
            pretty,
        } => run(&settings, scene, *ticks, *pretty),
        Commands::Serve => serve(settings),
        Commands::Sweep {
            kind,
            n1,
            n2,
            film_index,
            film_thickness,
            samples,
        } => {
            let rows = match kind {
                SweepKind::Fresnel => sweep::fresnel_sweep(*n1, *n2, *samples),
                SweepKind::ThinFilm => {
                    let stack = match film_index {
                        Some(index) => ThinFilmStack::single(
                            *index,
                            film_thickness.unwrap_or_else(|| {
                                thin_film::quarter_wave_thickness(settings.wavelength, *index)
                            }),
                        ),
                        None => thin_film::ideal_ar_coating(settings.wavelength, *n1, *n2),
                    };
                    sweep::thin_film_sweep(&stack, *n1, *n2, settings.wavelength, *samples)
                }
            };
            sweep::write_table(&rows, io::stdout().lock())
        }
    }
}

/// Reads the surrogate file named in the settings, if any.
fn load_surrogate(settings: &Settings) -> Result<Option<Vec<u8>>> {
    match &settings.surrogate_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read surrogate model {:?}", path))?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

fn run(settings: &Settings, path: &Path, ticks: usize, pretty: bool) -> Result<()> {
    let wire = scene::load_scene_file(path)?;
    let scene = SceneGraph::from_serialized(wire, settings)
        .with_context(|| format!("Invalid scene {:?}", path))?;
    let surrogate = load_surrogate(settings)?
        .map(|bytes| SurrogateModel::from_bytes(&bytes))
        .transpose()
        .context("Failed to load surrogate model")?;

    let start = Instant::now();
    let n = ticks.max(1);
    let pb = ProgressBar::new(n as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
        )
        .context("Invalid progress bar template")?
        .progress_chars("█▇▆▅▄▃▂▁"),
    );
    pb.set_message("tick".to_string());

    let mut energy = Powers::new();
    let mut world = Engine::tick(&scene, surrogate.as_ref());
    pb.inc(1);
    for _ in 1..n {
        if let Some(diagnostics) = &world.diagnostics {
            energy += diagnostics.energy;
        }
        world = Engine::tick(&scene, surrogate.as_ref());
        pb.inc(1);
    }
    if let Some(diagnostics) = &world.diagnostics {
        energy += diagnostics.energy;
    }
    pb.finish_and_clear();
    energy /= n as f64;

    let duration = start.elapsed();
    info!(
        "Time taken: {:.2?}, Time per tick: {:.2?}",
        duration,
        per_tick(duration, n)
    );
    info!("{}", energy);

    let response = Response::WorldState(world);
    let text = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        protocol::encode_response(&response)?
    };
    println!("{}", text);
    Ok(())
}

fn per_tick(duration: Duration, ticks: usize) -> Duration {
    duration.div_f64(ticks.max(1) as f64)
}

/// JSON lines in on stdin, JSON lines out on stdout.
fn serve(settings: Settings) -> Result<()> {
    let surrogate = load_surrogate(&settings)?;
    let worker = WorkerHandle::spawn(settings)?;
    if let Some(bytes) = surrogate {
        worker.send(Command::SetSurrogateModel(bytes))?;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match protocol::decode_command(&line) {
            Ok(command) => {
                let is_tick = matches!(command, Command::Tick(_));
                worker.send(command)?;
                if is_tick {
                    await_tick(&worker, &mut stdout)?;
                }
            }
            Err(e) => {
                warn!("{}", e);
                emit(&mut stdout, &Response::error(e.code(), e.to_string()))?;
            }
        }
        while let Some(response) = worker.try_recv() {
            emit(&mut stdout, &response)?;
        }
        stdout.flush()?;
    }

    info!("stdin closed, stopping worker");
    for response in worker.shutdown() {
        emit(&mut stdout, &response)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Forwards responses until the pending tick has answered, including the
/// diagnostic that follows an unclean world state.
fn await_tick<W: Write>(worker: &WorkerHandle, out: &mut W) -> Result<()> {
    loop {
        let response = worker.recv()?;
        let finished = match &response {
            Response::WorldState(world) => world
                .diagnostics
                .as_ref()
                .map_or(true, |d| d.is_clean()),
            Response::Diagnostic(_) => true,
            Response::Error(payload) => payload.code == ErrorCode::NoScene,
        };
        emit(out, &response)?;
        if finished {
            return Ok(());
        }
    }
}

fn emit<W: Write>(out: &mut W, response: &Response) -> Result<()> {
    writeln!(out, "{}", protocol::encode_response(response)?)?;
    Ok(())
}
