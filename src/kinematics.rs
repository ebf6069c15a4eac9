use crate::Observer;
use rand::Rng;
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;

/// Mass-energy of one nucleon mass number, in MeV.
pub const PROTON_MASS_MEV: f64 = 938.272_088_16;

/// Range-energy model of the active gas volume.
///
/// Energies are kinetic energies in MeV, paths are in meters, and `mass` /
/// `charge` are the mass and charge numbers of the traversing particle.
pub trait GasModel {
    /// Distance the particle travels before stopping.
    fn range(&self, energy: f64, mass: u32, charge: u32) -> f64;
    /// Kinetic energy of a particle whose remaining range is `path`.
    fn inverse_range(&self, path: f64, mass: u32, charge: u32) -> f64;
    /// Stopping power evaluated on a grid of kinetic energies.
    fn energy_loss(&self, energy_grid: &[f64], mass: u32, charge: u32) -> Vec<f64>;
}

/// Fixed description of the beam-on-target reaction being simulated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReactionParams {
    /// Beam kinetic energy at the entrance window, in MeV per nucleon.
    pub beam_energy_per_u: f64,
    pub beam_mass: u32,
    pub beam_charge: u32,
    pub recoil_mass: u32,
    pub recoil_charge: u32,
}

/// One simulated event, ready to be handed to the tracker.
///
/// `z0` is the vertex depth: the fraction of the (normalized, 1 m) beam path
/// traversed before the reaction. `polar` is restricted to the backward
/// hemisphere `[pi/2, pi)` matching the detector acceptance, and
/// `recoil_energy` is the unique physical recoil kinetic energy (MeV) for that
/// angle and the beam energy remaining at the vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventParameters {
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    pub recoil_energy: f64,
    pub azimuth: f64,
    pub polar: f64,
}

/// The error type for parameter rows with no physical interpretation.
///
/// These are per-row conditions: the affected row is dropped from the
/// parameter set and the batch continues.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KinematicsError {
    /// The beam stops in the gas before reaching the sampled depth.
    BeamStopped { depth: f64 },
    /// The angle/energy combination is kinematically forbidden.
    NoRealSolution { angle: f64 },
}

impl fmt::Display for KinematicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeamStopped { depth } => {
                write!(f, "beam stops before reaching vertex depth {depth}")
            }
            Self::NoRealSolution { angle } => {
                write!(f, "no real kinematic solution at lab angle {angle} rad")
            }
        }
    }
}

impl std::error::Error for KinematicsError {}

/// Beam kinetic energy remaining at a vertex depth, via the range-energy
/// model: the full range at the entrance energy is shortened by the traversed
/// path and inverted back to an energy.
pub fn vertex_energy(
    depth: f64,
    reaction: &ReactionParams,
    gas: &impl GasModel,
) -> Result<f64, KinematicsError> {
    let initial = reaction.beam_energy_per_u * f64::from(reaction.beam_mass);
    let full_range = gas.range(initial, reaction.beam_mass, reaction.beam_charge);
    let residual = full_range - depth;
    if residual <= 0.0 {
        return Err(KinematicsError::BeamStopped { depth });
    }

    Ok(gas.inverse_range(residual, reaction.beam_mass, reaction.beam_charge))
}

/// Kinetic energy of particle 3 in the two-body reaction `1 + 2 -> 3 + 4`,
/// with particle 2 at rest in the lab, particle 1 carrying kinetic energy
/// `kinetic`, and particle 3 emitted at lab angle `theta`.
///
/// Masses are rest mass-energies in MeV. The emission angle is transformed to
/// the center-of-mass frame through the lab-to-CM rapidity, and the physical
/// root of the resulting quadratic is selected. An imaginary root means the
/// requested angle lies outside the kinematically allowed cone.
pub fn two_body_recoil(
    theta: f64,
    m1: f64,
    m2: f64,
    m3: f64,
    m4: f64,
    kinetic: f64,
) -> Result<f64, KinematicsError> {
    let s = (m1 + m2).powi(2) + 2.0 * m2 * kinetic;
    let pcm = (((s - m1 * m1 - m2 * m2).powi(2) - 4.0 * m1 * m1 * m2 * m2) / (4.0 * s)).sqrt();
    let ppcm = (((s - m3 * m3 - m4 * m4).powi(2) - 4.0 * m3 * m3 * m4 * m4) / (4.0 * s)).sqrt();
    // Rapidity of the boost between the lab and CM frames.
    let chi = ((pcm + (m2 * m2 + pcm * pcm).sqrt()) / m2).ln();
    let e3cm = (ppcm * ppcm + m3 * m3).sqrt();

    let (sinh, cosh) = (chi.sinh(), chi.cosh());
    let (sin, cos) = theta.sin_cos();

    let disc = cosh * cosh * (e3cm * e3cm + m3 * m3 * (cos * cos * sinh * sinh - cosh * cosh));
    if disc < 0.0 {
        return Err(KinematicsError::NoRealSolution { angle: theta });
    }

    let denom = ppcm * (cosh * cosh - cos * cos * sinh * sinh);
    let sin_cm = sin * (e3cm * cos * sinh + disc.sqrt()) / denom;
    let p3 = ppcm * sin_cm / sin;
    let e3 = (p3 * p3 + m3 * m3).sqrt();

    Ok(e3 - m3)
}

/// Recoil kinetic energy for a sampled polar angle, given the beam kinetic
/// energy available at the vertex.
///
/// The sampled `polar` is measured against the beam axis in the detector
/// convention; the reaction-frame emission angle is its supplement.
pub fn recoil_energy(
    polar: f64,
    reaction: &ReactionParams,
    available: f64,
) -> Result<f64, KinematicsError> {
    let beam = f64::from(reaction.beam_mass) * PROTON_MASS_MEV;
    let recoil = f64::from(reaction.recoil_mass) * PROTON_MASS_MEV;

    two_body_recoil(PI - polar, beam, recoil, recoil, beam, available)
}

/// Samples up to `n` event parameter rows for the given reaction.
///
/// Vertex depths are uniform in `[0, 1)`, azimuths uniform in `[0, 2pi)`, and
/// polar angles uniform in `[pi/2, pi)`. Rows whose depth the beam cannot
/// reach, or whose angle has no kinematic solution, are reported to the
/// observer and dropped; the batch itself never aborts. The returned rows are
/// therefore at most `n`.
pub fn make_params<R, G, O>(
    n: usize,
    reaction: &ReactionParams,
    gas: &G,
    rng: &mut R,
    observer: &mut O,
) -> Vec<EventParameters>
where
    R: Rng + ?Sized,
    G: GasModel,
    O: Observer,
{
    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        let z0 = rng.random_range(0.0..1.0);
        let azimuth = rng.random_range(0.0..2.0 * PI);
        let polar = rng.random_range(FRAC_PI_2..PI);

        let row = vertex_energy(z0, reaction, gas)
            .and_then(|available| recoil_energy(polar, reaction, available))
            .map(|recoil_energy| EventParameters {
                x0: 0.0,
                y0: 0.0,
                z0,
                recoil_energy,
                azimuth,
                polar,
            });
        match row {
            Ok(row) => rows.push(row),
            Err(reason) => observer.on_row_excluded(&reason),
        }
    }

    rows
}
