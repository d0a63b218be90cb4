//! What a device does to a beam that reaches it.
//!
//! [`interact`] is the single exhaustive dispatch over [`DeviceType`]. It
//! yields a Mueller matrix per outgoing beam and leaves geometry (ray
//! directions, segment bookkeeping) to the engine.

use std::f64::consts::FRAC_PI_2;

use crate::config;
use crate::mueller::MuellerMatrix;
use crate::scene::{Device, DeviceType, SplitType};
use crate::snell;
use crate::surrogate::{SurrogateKey, SurrogateMiss, SurrogateMode, SurrogateModel};
use crate::thin_film::ThinFilmStack;

#[cfg(test)]
mod tests {

    use super::*;
    use crate::scene::DeviceParams;
    use crate::stokes::StokesVector;
    use nalgebra::{Point3, Vector3};

    fn device(device_type: DeviceType, params: DeviceParams) -> Device {
        Device {
            id: "d".to_string(),
            device_type,
            position: Point3::origin(),
            normal: Vector3::x(),
            params,
            split_type: None,
            aperture: 1.0,
        }
    }

    fn ctx() -> InteractionContext<'static> {
        InteractionContext {
            incidence_angle: 0.0,
            wavelength: 550.0,
            surrogate: None,
            enable_surrogate: false,
        }
    }

    #[test]
    fn polarizer_transmits() {
        let d = device(
            DeviceType::Polarizer,
            DeviceParams {
                angle: Some(0.3),
                ..Default::default()
            },
        );
        let outcome = interact(&d, &ctx());
        assert_eq!(
            outcome.interaction,
            Interaction::Transmit(MuellerMatrix::linear_polarizer(0.3))
        );
        assert!(outcome.fallback.is_none());
    }

    #[test]
    fn general_retarder_from_birefringence() {
        let d = device(
            DeviceType::GeneralRetarder,
            DeviceParams {
                birefringence: Some(0.01),
                thickness: Some(550.0 / 0.04),
                ..Default::default()
            },
        );
        let Interaction::Transmit(m) = interact(&d, &ctx()).interaction else {
            panic!("retarder should transmit");
        };
        assert!(m.approx_eq(&MuellerMatrix::quarter_wave_plate(0.0), 1e-12));
    }

    #[test]
    fn pbs_ports_partition_energy() {
        let mut d = device(
            DeviceType::Splitter,
            DeviceParams {
                angle: Some(0.2),
                ..Default::default()
            },
        );
        d.split_type = Some(SplitType::Pbs);
        let Interaction::Split(ports) = interact(&d, &ctx()).interaction else {
            panic!("splitter should split");
        };
        assert_eq!(ports.len(), 2);
        let input = StokesVector::new(1.0, 0.2, -0.5, 0.1);
        let total: f64 = ports.iter().map(|p| p.mueller.apply(&input).s0()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(ports[0].direction, PortDirection::Straight);
        assert_eq!(ports[1].direction, PortDirection::Reflected);
    }

    #[test]
    fn calcite_displaces_extraordinary_ray() {
        let mut d = device(
            DeviceType::Splitter,
            DeviceParams {
                walk_off: Some(0.25),
                ..Default::default()
            },
        );
        d.split_type = Some(SplitType::Calcite);
        let Interaction::Split(ports) = interact(&d, &ctx()).interaction else {
            panic!("splitter should split");
        };
        assert_eq!(ports[0].walk_off, 0.0);
        assert_eq!(ports[1].walk_off, 0.25);
        assert!(ports.iter().all(|p| p.direction == PortDirection::Straight));
    }

    #[test]
    fn npbs_uses_split_ratio() {
        let mut d = device(
            DeviceType::Splitter,
            DeviceParams {
                split_ratio: Some(0.3),
                ..Default::default()
            },
        );
        d.split_type = Some(SplitType::Npbs);
        let Interaction::Split(ports) = interact(&d, &ctx()).interaction else {
            panic!("splitter should split");
        };
        assert!((ports[0].mueller.get(0, 0) - 0.3).abs() < 1e-12);
        assert!((ports[1].mueller.get(0, 0) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn thin_film_reflects_under_substrate_tir() {
        let d = device(
            DeviceType::ThinFilm,
            DeviceParams {
                thin_film: Some(ThinFilmStack::single(1.38, 100.0)),
                n1: Some(1.5),
                n2: Some(1.0),
                ..Default::default()
            },
        );
        let mut c = ctx();
        c.incidence_angle = 1.2;
        assert!(matches!(interact(&d, &c).interaction, Interaction::Reflect(_)));
        c.incidence_angle = 0.1;
        assert!(matches!(interact(&d, &c).interaction, Interaction::Transmit(_)));
    }

    #[test]
    fn surrogate_fallback_is_reported() {
        let d = device(
            DeviceType::ThinFilm,
            DeviceParams {
                thin_film: Some(ThinFilmStack::single(1.38, 100.0)),
                ..Default::default()
            },
        );
        let mut c = ctx();
        c.enable_surrogate = true;
        let outcome = interact(&d, &c);
        assert_eq!(outcome.fallback, Some(SurrogateMiss::NoModel));
        assert!(matches!(outcome.interaction, Interaction::Transmit(_)));
    }

    #[test]
    fn sensor_and_mirror() {
        let d = device(
            DeviceType::Sensor,
            DeviceParams {
                transmissive: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(interact(&d, &ctx()).interaction, Interaction::Sense { transmit: true });

        let m = device(DeviceType::Mirror, DeviceParams::default());
        assert_eq!(interact(&m, &ctx()).interaction, Interaction::Reflect(MuellerMatrix::mirror()));
    }
}

/// Direction of an outgoing splitter beam relative to the incoming ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Straight,
    Reflected,
}

/// One output of a splitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub mueller: MuellerMatrix,
    pub direction: PortDirection,
    /// Lateral displacement of the outgoing ray (scene units).
    pub walk_off: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Transmit(MuellerMatrix),
    Reflect(MuellerMatrix),
    Split(Vec<Port>),
    Sense { transmit: bool },
}

impl Interaction {
    /// Output Mueller matrices in port order.
    pub fn ports(&self) -> Vec<Port> {
        match self {
            Interaction::Transmit(m) => vec![Port {
                mueller: *m,
                direction: PortDirection::Straight,
                walk_off: 0.0,
            }],
            Interaction::Reflect(m) => vec![Port {
                mueller: *m,
                direction: PortDirection::Reflected,
                walk_off: 0.0,
            }],
            Interaction::Split(ports) => ports.clone(),
            Interaction::Sense { transmit: true } => vec![Port {
                mueller: MuellerMatrix::identity(),
                direction: PortDirection::Straight,
                walk_off: 0.0,
            }],
            Interaction::Sense { transmit: false } => Vec::new(),
        }
    }
}

/// Per-hit inputs beyond the device itself.
#[derive(Debug, Clone, Copy)]
pub struct InteractionContext<'a> {
    pub incidence_angle: f64,
    /// Wavelength of the arriving light (nm).
    pub wavelength: f64,
    pub surrogate: Option<&'a SurrogateModel>,
    pub enable_surrogate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub interaction: Interaction,
    /// Set when the surrogate was enabled but could not be used.
    pub fallback: Option<SurrogateMiss>,
}

impl From<Interaction> for Outcome {
    fn from(interaction: Interaction) -> Self {
        Outcome {
            interaction,
            fallback: None,
        }
    }
}

pub fn interact(device: &Device, ctx: &InteractionContext) -> Outcome {
    let p = &device.params;
    let angle = p.angle.unwrap_or(0.0);

    match device.device_type {
        // emitters are never hit; treat as transparent
        DeviceType::Emitter => Interaction::Transmit(MuellerMatrix::identity()).into(),
        DeviceType::Polarizer => Interaction::Transmit(MuellerMatrix::linear_polarizer(angle)).into(),
        DeviceType::QuarterWavePlate => {
            Interaction::Transmit(MuellerMatrix::quarter_wave_plate(angle)).into()
        }
        DeviceType::HalfWavePlate => {
            Interaction::Transmit(MuellerMatrix::half_wave_plate(angle)).into()
        }
        DeviceType::GeneralRetarder => {
            let delta = p.retardance.unwrap_or_else(|| {
                snell::retardance_from_birefringence(
                    p.birefringence.unwrap_or(0.0),
                    p.thickness.unwrap_or(0.0),
                    ctx.wavelength,
                )
            });
            Interaction::Transmit(MuellerMatrix::waveplate(delta, angle)).into()
        }
        DeviceType::Rotator => Interaction::Transmit(MuellerMatrix::rotator(angle)).into(),
        DeviceType::Mirror => {
            let m = if p.n1.is_some() || p.n2.is_some() {
                MuellerMatrix::fresnel_reflect(
                    p.n1.unwrap_or(config::DEFAULT_INCIDENT_INDEX),
                    p.n2.unwrap_or(config::DEFAULT_SUBSTRATE_INDEX),
                    ctx.incidence_angle,
                )
            } else {
                MuellerMatrix::mirror()
            };
            Interaction::Reflect(m).into()
        }
        DeviceType::Splitter => Interaction::Split(split_ports(device, angle)).into(),
        DeviceType::Attenuator => {
            Interaction::Transmit(MuellerMatrix::attenuator(p.transmission.unwrap_or(1.0))).into()
        }
        DeviceType::Sensor => Interaction::Sense {
            transmit: p.transmissive.unwrap_or(false),
        }
        .into(),
        DeviceType::Depolarizer => {
            let transmission = p.transmission.unwrap_or(1.0);
            let m = match p.depolarization {
                Some(fraction) => MuellerMatrix::partial_depolarizer(fraction).scale(transmission),
                None => MuellerMatrix::depolarizer(transmission),
            };
            Interaction::Transmit(m).into()
        }
        // focusing is not modeled
        DeviceType::Lens => Interaction::Transmit(MuellerMatrix::identity()).into(),
        DeviceType::ThinFilm => thin_film(device, ctx),
    }
}

fn split_ports(device: &Device, angle: f64) -> Vec<Port> {
    let p = &device.params;
    match device.split_type.unwrap_or(SplitType::Pbs) {
        SplitType::Pbs => vec![
            Port {
                mueller: MuellerMatrix::linear_polarizer(angle),
                direction: PortDirection::Straight,
                walk_off: 0.0,
            },
            Port {
                mueller: MuellerMatrix::linear_polarizer(angle + FRAC_PI_2),
                direction: PortDirection::Reflected,
                walk_off: 0.0,
            },
        ],
        SplitType::Npbs => {
            let ratio = p.split_ratio.unwrap_or(config::DEFAULT_SPLIT_RATIO);
            vec![
                Port {
                    mueller: MuellerMatrix::attenuator(ratio),
                    direction: PortDirection::Straight,
                    walk_off: 0.0,
                },
                Port {
                    mueller: MuellerMatrix::attenuator(1.0 - ratio),
                    direction: PortDirection::Reflected,
                    walk_off: 0.0,
                },
            ]
        }
        SplitType::Calcite => vec![
            Port {
                mueller: MuellerMatrix::linear_polarizer(angle),
                direction: PortDirection::Straight,
                walk_off: 0.0,
            },
            Port {
                mueller: MuellerMatrix::linear_polarizer(angle + FRAC_PI_2),
                direction: PortDirection::Straight,
                walk_off: p.walk_off.unwrap_or(0.0),
            },
        ],
    }
}

fn thin_film(device: &Device, ctx: &InteractionContext) -> Outcome {
    let p = &device.params;
    let empty = ThinFilmStack::default();
    let stack = p.thin_film.as_ref().unwrap_or(&empty);
    let n1 = p.n1.unwrap_or(config::DEFAULT_INCIDENT_INDEX);
    let n2 = p.n2.unwrap_or(config::DEFAULT_SUBSTRATE_INDEX);
    let theta = ctx.incidence_angle;

    let reflect = p.reflective.unwrap_or(false) || snell::is_total_internal_reflection(theta, n1, n2);
    let mode = if reflect {
        SurrogateMode::Reflect
    } else {
        SurrogateMode::Transmit
    };

    let mut fallback = None;
    if ctx.enable_surrogate {
        match lookup_surrogate(ctx.surrogate, stack, n1, n2, ctx.wavelength, mode, theta) {
            Ok(m) => {
                let interaction = match mode {
                    SurrogateMode::Reflect => Interaction::Reflect(m),
                    SurrogateMode::Transmit => Interaction::Transmit(m),
                };
                return interaction.into();
            }
            Err(miss) => fallback = Some(miss),
        }
    }

    let transmitted = if reflect {
        None
    } else {
        MuellerMatrix::thin_film_transmit(stack, n1, n2, theta, ctx.wavelength)
    };
    let interaction = match transmitted {
        Some(m) => Interaction::Transmit(m),
        None => Interaction::Reflect(MuellerMatrix::thin_film_reflect(
            stack,
            n1,
            n2,
            theta,
            ctx.wavelength,
        )),
    };
    Outcome {
        interaction,
        fallback,
    }
}

fn lookup_surrogate(
    model: Option<&SurrogateModel>,
    stack: &ThinFilmStack,
    n1: f64,
    n2: f64,
    wavelength: f64,
    mode: SurrogateMode,
    theta: f64,
) -> Result<MuellerMatrix, SurrogateMiss> {
    let model = model.ok_or(SurrogateMiss::NoModel)?;
    if (n1 - config::DEFAULT_INCIDENT_INDEX).abs() > config::SURROGATE_MATCH_TOLERANCE {
        return Err(SurrogateMiss::UnsupportedStack);
    }
    let key = SurrogateKey::for_stack(stack, n2, wavelength, mode).ok_or(SurrogateMiss::UnsupportedStack)?;
    model.lookup(&key, theta)
}
