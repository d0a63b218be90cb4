//! Traces light from every emitter through one scene snapshot.

use std::f64::consts::FRAC_PI_2;
use std::time::Instant;

use log::{debug, trace, warn};
use nalgebra::Point3;

use crate::{
    beam::Beam,
    config, geom,
    interaction::{self, Interaction, InteractionContext, PortDirection},
    scene::{Device, DeviceType, SceneGraph},
    stokes::StokesVector,
    surrogate::SurrogateModel,
    world::{
        ConstraintViolation, DeviceState, DiagnosticInfo, LightSegment, SurrogateFallback,
        Truncation, TruncationReason, WorldState,
    },
};

#[cfg(test)]
mod tests {

    use super::*;
    use crate::mueller::MuellerMatrix;
    use crate::scene::SerializedSceneGraph;
    use crate::surrogate::{SurrogateMode, SurrogateRecord};
    use serde_json::json;

    fn scene(value: serde_json::Value) -> SceneGraph {
        let wire: SerializedSceneGraph = serde_json::from_value(value).unwrap();
        SceneGraph::try_from(wire).unwrap()
    }

    fn emitter_and(devices: Vec<serde_json::Value>) -> SceneGraph {
        let mut all = vec![json!({
            "id": "laser", "type": "emitter",
            "position": [0.0, 0.0, 0.0], "normal": [1.0, 0.0, 0.0],
            "params": { "polarizationAngle": 0.0, "intensity": 1.0 }
        })];
        all.extend(devices);
        scene(json!({ "version": 1, "devices": all }))
    }

    #[test]
    fn emitter_alone_escapes() {
        let graph = emitter_and(vec![]);
        let world = Engine::tick(&graph, None);
        assert_eq!(world.segments.len(), 1);
        let segment = &world.segments[0];
        assert_eq!(segment.source_id, "laser");
        assert!((segment.end[0] - 100.0).abs() < 1e-9, "{:?}", segment.end);
        let diagnostics = world.diagnostics.unwrap();
        assert!(diagnostics.completed);
        assert!((diagnostics.energy.escaped - 1.0).abs() < 1e-12);
        assert_eq!(
            world.devices[0].output_stokes,
            Some(vec![StokesVector::horizontal(1.0)])
        );
    }

    #[test]
    fn polarizer_then_sensor() {
        let graph = emitter_and(vec![
            json!({ "id": "pol", "type": "polarizer", "position": [1.0, 0.0, 0.0],
                    "normal": [-1.0, 0.0, 0.0], "params": { "angle": std::f64::consts::FRAC_PI_4 } }),
            json!({ "id": "eye", "type": "sensor", "position": [2.0, 0.0, 0.0],
                    "normal": [-1.0, 0.0, 0.0] }),
        ]);
        let world = Engine::tick(&graph, None);
        assert!((world.sensor_intensity("eye") - 0.5).abs() < 1e-9);
        let eye = world.device("eye").unwrap();
        assert!(eye.activated);
        assert_eq!(eye.hits, 1);
        assert!(eye.output_stokes.is_none());
        let energy = world.diagnostics.unwrap().energy;
        assert!((energy.sensed - 0.5).abs() < 1e-9);
        assert!((energy.absorbed - 0.5).abs() < 1e-9);
        assert!(energy.missing().abs() < 1e-9, "{}", energy);
    }

    #[test]
    fn aperture_is_respected() {
        let graph = emitter_and(vec![json!({
            "id": "eye", "type": "sensor", "position": [1.0, 2.0, 0.0],
            "normal": [-1.0, 0.0, 0.0], "params": { "aperture": 0.5 }
        })]);
        let world = Engine::tick(&graph, None);
        assert_eq!(world.sensor_intensity("eye"), 0.0);
        assert_eq!(world.device("eye").unwrap().input_stokes, None);
    }

    #[test]
    fn colocated_devices_are_each_visited_once() {
        let graph = emitter_and(vec![
            json!({ "id": "a", "type": "rotator", "position": [1.0, 0.0, 0.0],
                    "normal": [-1.0, 0.0, 0.0], "params": { "angle": 0.3 } }),
            json!({ "id": "b", "type": "rotator", "position": [1.0, 0.0, 0.0],
                    "normal": [-1.0, 0.0, 0.0], "params": { "angle": 0.3 } }),
        ]);
        let world = Engine::tick(&graph, None);
        assert_eq!(world.device("a").unwrap().hits, 1);
        assert_eq!(world.device("b").unwrap().hits, 1);
        // one segment to the pair, one leaving it
        assert_eq!(world.segments.len(), 2);
        assert!((world.segments[1].stokes.angle_of_linear_polarization() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn dim_emitter_is_dropped() {
        let graph = scene(json!({
            "version": 1,
            "devices": [{ "id": "laser", "type": "emitter", "position": [0.0, 0.0, 0.0],
                          "normal": [1.0, 0.0, 0.0], "params": { "intensity": 1e-6 } }],
            "config": { "intensityThreshold": 1e-3 }
        }));
        let world = Engine::tick(&graph, None);
        assert!(world.segments.is_empty());
        let energy = world.diagnostics.unwrap().energy;
        assert!((energy.trnc_threshold - 1e-6).abs() < 1e-15);
    }

    #[test]
    fn segment_cap_truncates() {
        let graph = scene(json!({
            "version": 1,
            "devices": [
                { "id": "laser", "type": "emitter", "position": [0.0, 0.0, 0.0],
                  "normal": [1.0, 0.0, 0.0], "params": { "unpolarized": true } },
                { "id": "split", "type": "splitter", "position": [1.0, 0.0, 0.0],
                  "normal": [-1.0, 1.0, 0.0], "params": { "splitType": "NPBS" } }
            ],
            "config": { "maxSegments": 2 }
        }));
        let world = Engine::tick(&graph, None);
        assert_eq!(world.segments.len(), 2);
        let diagnostics = world.diagnostics.unwrap();
        assert!(!diagnostics.completed);
        assert_eq!(diagnostics.truncations.len(), 1);
        assert_eq!(diagnostics.truncations[0].reason, TruncationReason::MaxSegments);
        assert!(diagnostics.energy.missing().abs() < 1e-9, "{}", diagnostics.energy);
    }

    #[test]
    fn unphysical_output_is_clamped_and_reported() {
        let graph = scene(json!({
            "version": 1,
            "devices": [
                { "id": "laser", "type": "emitter", "position": [0.0, 0.0, 0.0],
                  "normal": [1.0, 0.0, 0.0], "params": { "unpolarized": true } },
                { "id": "film", "type": "thinFilm", "position": [2.0, 0.0, 0.0],
                  "normal": [-1.0, 0.0, 0.0],
                  "params": { "n2": 1.52, "thinFilm": { "layers": [{ "index": 1.38, "thickness": 99.6 }] } } }
            ],
            "config": { "enableSurrogate": true }
        }));
        // m10 = 2 m00 turns unpolarized light into S1 = 2 S0
        let mut values = [0.0; 16];
        values[0] = 1.0;
        values[4] = 2.0;
        let model = SurrogateModel {
            records: vec![SurrogateRecord {
                film_index: 1.38,
                thickness: 99.6,
                wavelength: 550.0,
                substrate_index: 1.52,
                mode: SurrogateMode::Transmit,
                angle_min: 0.0,
                angle_max: 1.0,
                samples: vec![MuellerMatrix::from_row_major(values); 2],
            }],
        };

        let world = Engine::tick(&graph, Some(&model));
        let diagnostics = world.diagnostics.as_ref().unwrap();
        assert!(diagnostics.surrogate_fallbacks.is_empty());
        assert_eq!(diagnostics.violations.len(), 1);
        let violation = &diagnostics.violations[0];
        assert_eq!(violation.device_id, "film");
        assert_eq!(violation.source_id, "laser");
        assert!(!violation.original.validate(config::PHYSICAL_TOLERANCE));
        assert!(violation.clamped.validate(config::PHYSICAL_TOLERANCE));
        assert!((violation.original.s1() - 2.0).abs() < 1e-12);
        assert!((violation.clamped.intensity() - violation.original.intensity()).abs() < 1e-12);
        assert!((violation.clamped.s1() - 1.0).abs() < 1e-12);
        assert_eq!(
            world.device("film").unwrap().output_stokes,
            Some(vec![violation.clamped])
        );
        assert!(!diagnostics.is_clean());
        assert!(diagnostics.energy.missing().abs() < 1e-9, "{}", diagnostics.energy);
    }

    #[test]
    fn outputs_accumulate_per_direction() {
        // glass to air: "straight" meets the film head on and transmits,
        // "steep" arrives at 60 degrees and is totally reflected
        let steep = std::f64::consts::FRAC_PI_3;
        let graph = scene(json!({
            "version": 1,
            "devices": [
                { "id": "straight", "type": "emitter", "position": [0.0, 0.0, 0.0],
                  "normal": [1.0, 0.0, 0.0], "params": { "unpolarized": true } },
                { "id": "steep", "type": "emitter",
                  "position": [2.0 - 2.0 * steep.cos(), -2.0 * steep.sin(), 0.0],
                  "normal": [steep.cos(), steep.sin(), 0.0], "params": { "unpolarized": true } },
                { "id": "film", "type": "thinFilm", "position": [2.0, 0.0, 0.0],
                  "normal": [-1.0, 0.0, 0.0],
                  "params": { "n1": 1.5, "n2": 1.0,
                              "thinFilm": { "layers": [{ "index": 1.5, "thickness": 100.0 }] } } }
            ]
        }));
        let world = Engine::tick(&graph, None);
        let film = world.device("film").unwrap();
        assert_eq!(film.hits, 2);
        let outputs = film.output_stokes.clone().unwrap();
        assert_eq!(outputs.len(), 2, "{:?}", outputs);

        let mut intensities: Vec<f64> = outputs.iter().map(StokesVector::intensity).collect();
        intensities.sort_by(f64::total_cmp);
        // bare glass-air interface at normal incidence transmits 96 %
        assert!((intensities[0] - 0.96).abs() < 1e-9, "{:?}", intensities);
        assert!((intensities[1] - 1.0).abs() < 1e-9, "{:?}", intensities);
    }

    #[test]
    fn repeated_hits_sum_into_the_same_port() {
        let mut values = vec![
            (PortDirection::Straight, StokesVector::horizontal(1.0)),
            (PortDirection::Reflected, StokesVector::vertical(0.5)),
        ];
        let mut totals = Vec::new();
        let mut directions = Vec::new();
        merge_ports(&mut totals, &mut directions, &values);
        values.reverse();
        merge_ports(&mut totals, &mut directions, &values);
        assert_eq!(directions, [PortDirection::Straight, PortDirection::Reflected]);
        assert_eq!(totals, [StokesVector::horizontal(2.0), StokesVector::vertical(1.0)]);
    }
}

/// One tick of beam tracing over an immutable scene.
#[derive(Debug)]
pub struct Engine<'a> {
    scene: &'a SceneGraph,
    surrogate: Option<&'a SurrogateModel>,
    beam_queue: Vec<Beam>, // ascending power, popped from the back
    segments: Vec<LightSegment>,
    states: Vec<DeviceState>, // parallel to `scene.devices`
    port_directions: Vec<Vec<PortDirection>>, // parallel to each `output_stokes`
    diagnostics: DiagnosticInfo,
}

impl<'a> Engine<'a> {
    pub fn new(scene: &'a SceneGraph, surrogate: Option<&'a SurrogateModel>) -> Self {
        Self {
            scene,
            surrogate,
            beam_queue: Vec::new(),
            segments: Vec::new(),
            states: scene.devices.iter().map(|d| DeviceState::new(&d.id)).collect(),
            port_directions: vec![Vec::new(); scene.devices.len()],
            diagnostics: DiagnosticInfo {
                completed: true,
                ..Default::default()
            },
        }
    }

    /// Runs a full tick and returns the resulting world.
    pub fn tick(scene: &SceneGraph, surrogate: Option<&SurrogateModel>) -> WorldState {
        Engine::new(scene, surrogate).solve()
    }

    pub fn solve(mut self) -> WorldState {
        let start = Instant::now();
        self.illuminate();

        loop {
            if self.beam_queue.is_empty() {
                break;
            }
            if self.segments.len() >= self.scene.config.max_segments {
                self.truncate_remaining();
                break;
            }
            self.propagate_next();
        }

        self.diagnostics.elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
        let energy = &self.diagnostics.energy;
        if energy.missing().abs() > 1e-6 * energy.input.max(1.0) {
            warn!("energy budget does not close:\n{}", energy);
        }
        debug!(
            "scene v{}: {} segments from {} iterations in {:.3} ms",
            self.scene.version,
            self.segments.len(),
            self.diagnostics.iterations,
            self.diagnostics.elapsed_ms
        );

        WorldState {
            timestamp: chrono::Utc::now().timestamp_millis(),
            scene_version: self.scene.version,
            segments: self.segments,
            devices: self.states,
            diagnostics: Some(self.diagnostics),
        }
    }

    /// Seeds one beam per emitter.
    fn illuminate(&mut self) {
        for (index, device) in self.scene.devices.iter().enumerate() {
            if device.device_type != DeviceType::Emitter {
                continue;
            }
            let stokes = emitted_stokes(device);
            self.diagnostics.energy.input += stokes.intensity();
            self.states[index].output_stokes = Some(vec![stokes]);
            let wavelength = device.params.wavelength.unwrap_or(0.0);
            self.insert_beam(Beam::new_initial(
                device.position,
                device.normal,
                stokes,
                wavelength,
                index,
            ));
        }
    }

    /// Pops the brightest beam and traces it to its next interaction.
    pub fn propagate_next(&mut self) {
        let Some(beam) = self.beam_queue.pop() else {
            return;
        };
        self.diagnostics.iterations += 1;

        let power = beam.power();
        if power < self.scene.config.intensity_threshold {
            trace!("dropping beam from '{}' at {:.3e}", self.source_id(&beam), power);
            self.diagnostics.energy.trnc_threshold += power;
            return;
        }

        let ray = beam.ray();
        let exit = self.scene.config.scene_boundary.exit_distance(&ray);
        match self.nearest_hit(&beam) {
            Some((index, distance)) if distance <= exit => self.interact(beam, index, distance),
            _ => {
                if exit > 0.0 {
                    self.push_segment(&beam, ray.at(exit));
                }
                self.diagnostics.energy.escaped += power;
            }
        }
    }

    /// Nearest device disc along the beam. Emitters and devices already
    /// processed at the beam origin are skipped; ties go to the device
    /// declared first.
    fn nearest_hit(&self, beam: &Beam) -> Option<(usize, f64)> {
        let ray = beam.ray();
        let mut nearest: Option<(usize, f64)> = None;
        for (index, device) in self.scene.devices.iter().enumerate() {
            if device.device_type == DeviceType::Emitter || beam.visited_here.contains(&index) {
                continue;
            }
            let Some(distance) = geom::intersect_disc(
                &ray,
                &device.position,
                &device.normal,
                device.aperture,
                -config::RAYCAST_MINIMUM_DISTANCE,
            ) else {
                continue;
            };
            match nearest {
                Some((_, best)) if distance >= best - config::TIE_DISTANCE => {}
                _ => nearest = Some((index, distance)),
            }
        }
        nearest
    }

    fn interact(&mut self, beam: Beam, index: usize, distance: f64) {
        let scene = self.scene;
        let device = &scene.devices[index];
        let hit_point = beam.ray().at(distance);
        let colocated = distance < config::RAYCAST_MINIMUM_DISTANCE;
        if !colocated {
            self.push_segment(&beam, hit_point);
        }

        let power = beam.power();
        let state = &mut self.states[index];
        state.hits += 1;
        state.input_stokes = Some(match state.input_stokes {
            Some(total) => total.add(&beam.stokes),
            None => beam.stokes,
        });

        if beam.depth >= scene.config.max_bounces {
            debug!(
                "beam from '{}' reached max bounces at '{}'",
                self.source_id(&beam),
                device.id
            );
            self.diagnostics.energy.trnc_bounce += power;
            self.truncate(&beam, Some(index), TruncationReason::MaxBounces);
            return;
        }

        let ctx = InteractionContext {
            incidence_angle: geom::incidence_angle(&beam.prop, &device.normal),
            wavelength: beam.wavelength,
            surrogate: self.surrogate,
            enable_surrogate: scene.config.enable_surrogate,
        };
        let outcome = interaction::interact(device, &ctx);
        if let Some(miss) = outcome.fallback {
            self.record_fallback(device, miss.to_string());
        }

        if let Interaction::Sense { transmit } = outcome.interaction {
            let threshold = device.params.threshold.unwrap_or(0.0);
            let acceptance = device.params.acceptance_angle.unwrap_or(FRAC_PI_2);
            if power >= threshold && ctx.incidence_angle <= acceptance {
                self.states[index].activated = true;
            }
            if !transmit {
                self.diagnostics.energy.sensed += power;
                return;
            }
        }

        let visited_here = if colocated {
            let mut visited = beam.visited_here.clone();
            visited.push(index);
            visited
        } else {
            vec![index]
        };

        let mut outputs = Vec::new();
        let mut children = Vec::new();
        for port in outcome.interaction.ports() {
            let produced = port.mueller.apply(&beam.stokes);
            let clamped = produced.clamp_to_physical();
            if !produced.validate(config::PHYSICAL_TOLERANCE) {
                debug!("clamped unphysical output at '{}': {}", device.id, produced);
                self.diagnostics.violations.push(ConstraintViolation {
                    device_id: device.id.clone(),
                    source_id: scene.devices[beam.source].id.clone(),
                    original: produced,
                    clamped,
                });
            }

            let prop = match port.direction {
                PortDirection::Straight => beam.prop,
                PortDirection::Reflected => geom::reflect(&beam.prop, &device.normal),
            };
            let origin = if port.walk_off != 0.0 {
                hit_point + geom::perpendicular(&beam.prop) * port.walk_off
            } else {
                hit_point
            };
            outputs.push((port.direction, clamped));
            children.push(beam.outgoing(origin, prop, clamped, visited_here.clone()));
        }

        let out_power: f64 = outputs.iter().map(|(_, stokes)| stokes.intensity()).sum();
        self.diagnostics.energy.absorbed += power - out_power;

        let totals = self.states[index].output_stokes.get_or_insert_with(Vec::new);
        merge_ports(totals, &mut self.port_directions[index], &outputs);

        for child in children {
            self.insert_beam(child);
        }
    }

    /// Moves every queued beam into the truncation buckets once the segment
    /// cap is reached.
    fn truncate_remaining(&mut self) {
        let remaining = std::mem::take(&mut self.beam_queue);
        warn!(
            "segment cap of {} reached with {} beams queued",
            self.scene.config.max_segments,
            remaining.len()
        );
        for beam in remaining {
            let power = beam.power();
            if power < self.scene.config.intensity_threshold {
                self.diagnostics.energy.trnc_threshold += power;
            } else {
                self.diagnostics.energy.trnc_segments += power;
                self.truncate(&beam, None, TruncationReason::MaxSegments);
            }
        }
    }

    fn truncate(&mut self, beam: &Beam, device: Option<usize>, reason: TruncationReason) {
        let truncation = Truncation {
            source_id: self.source_id(beam).to_string(),
            device_id: device.map(|i| self.scene.devices[i].id.clone()),
            reason,
            intensity: beam.power(),
        };
        self.diagnostics.completed = false;
        self.diagnostics.truncations.push(truncation);
    }

    /// Records the first fallback per device.
    fn record_fallback(&mut self, device: &Device, reason: String) {
        let seen = self
            .diagnostics
            .surrogate_fallbacks
            .iter()
            .any(|f| f.device_id == device.id);
        if !seen {
            debug!("surrogate fallback at '{}': {}", device.id, reason);
            self.diagnostics.surrogate_fallbacks.push(SurrogateFallback {
                device_id: device.id.clone(),
                reason,
            });
        }
    }

    fn push_segment(&mut self, beam: &Beam, end: Point3<f64>) {
        let segment = LightSegment {
            source_id: self.source_id(beam).to_string(),
            start: to_array(&beam.origin),
            end: to_array(&end),
            stokes: beam.stokes,
            wavelength: beam.wavelength,
            intensity: beam.power(),
            depth: beam.depth,
        };
        self.segments.push(segment);
    }

    fn source_id(&self, beam: &Beam) -> &str {
        &self.scene.devices[beam.source].id
    }

    /// Inserts a beam such that the brightest beam is popped first.
    fn insert_beam(&mut self, beam: Beam) {
        let pos = get_position_by_power(beam.power(), &self.beam_queue);
        self.beam_queue.insert(pos, beam);
    }
}

/// Stokes vector leaving an emitter.
pub fn emitted_stokes(device: &Device) -> StokesVector {
    let p = &device.params;
    let intensity = p.intensity.unwrap_or(1.0);
    if p.unpolarized.unwrap_or(false) {
        StokesVector::unpolarized(intensity)
    } else {
        StokesVector::elliptical(
            intensity,
            p.polarization_angle.unwrap_or(0.0),
            p.ellipticity.unwrap_or(0.0),
        )
    }
}

/// Adds one interaction's outputs to a device's running totals. The k-th
/// output leaving in a given direction accumulates into the k-th slot with
/// that direction; directions not seen before get new slots.
fn merge_ports(
    totals: &mut Vec<StokesVector>,
    directions: &mut Vec<PortDirection>,
    outputs: &[(PortDirection, StokesVector)],
) {
    let mut used = vec![false; totals.len()];
    for (direction, stokes) in outputs {
        let slot = (0..totals.len()).find(|&i| !used[i] && directions[i] == *direction);
        match slot {
            Some(i) => {
                totals[i] = totals[i].add(stokes);
                used[i] = true;
            }
            None => {
                totals.push(*stokes);
                directions.push(*direction);
                used.push(true);
            }
        }
    }
}

/// Insertion index keeping `queue` sorted by ascending power. Equal powers
/// go after existing entries, so among equals the newest beam pops first.
fn get_position_by_power(value: f64, queue: &[Beam]) -> usize {
    queue.partition_point(|beam| beam.power() <= value)
}

fn to_array(p: &Point3<f64>) -> [f64; 3] {
    [p.x, p.y, p.z]
}
