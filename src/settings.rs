use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::error::BinError;
use crate::quadrature::QuadratureOrder;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        cutoff = 4.0
        skin = 1.0
        quadrature_order = 2
        max_poly = 2
        rebuild_every = 10

        [system]
        elements = [2, 2, 2]
        element_scale = [4, 4, 4]
        lattice_constant = 3.6
        atoms = 50
        steps = 3
    "#;

    #[test]
    fn parse_minimal_toml() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        assert_eq!(settings.cutoff, 4.0);
        assert_eq!(settings.quadrature_order, QuadratureOrder::Two);
        assert_eq!(settings.cell_capacity, DEFAULT_CELL_CAPACITY);
        assert_eq!(settings.cell_growth, DEFAULT_CELL_GROWTH);
        assert!(!settings.one_layer);
        assert_eq!(settings.bin_size, None);
        assert_eq!(settings.system.periodic, [true, true, true]);
        assert_eq!(settings.system.phases, 1);
        assert_eq!(settings.neighbor_cutoff(), 5.0);
    }

    #[test]
    fn reject_bad_quadrature_order() {
        let doc = MINIMAL.replace("quadrature_order = 2", "quadrature_order = 3");
        assert!(Settings::from_toml_str(&doc).is_err());
    }

    #[test]
    fn validate_rejects_nonpositive_cutoff() {
        let mut settings = Settings::from_toml_str(MINIMAL).unwrap();
        settings.cutoff = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(BinError::Configuration { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_growth() {
        let mut settings = Settings::from_toml_str(MINIMAL).unwrap();
        settings.cell_growth = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_config_loads() {
        let settings = load_default_config().unwrap();
        assert!(settings.validate().is_ok());
    }
}

/// Round-off margin, as a fraction of the box extent, when computing the
/// range of cells a sub-box can reach.
pub const SMALL: f64 = 1.0e-6;
/// Largest tolerated ratio of target cell size to real cell size.
pub const CUT2BIN_RATIO: f64 = 100.0;
/// Largest number of cells along a single axis.
pub const MAX_AXIS_BINS: f64 = i32::MAX as f64;
/// Default number of members a cell can hold before its first expansion.
pub const DEFAULT_CELL_CAPACITY: usize = 100;
/// Default number of member slots added by each cell expansion.
pub const DEFAULT_CELL_GROWTH: usize = 100;
/// Default upper bound on the number of allocated cells.
pub const DEFAULT_MAX_CELLS: usize = 1_000_000;
/// Upper bound on member slots reserved up front, `cells * cell_capacity`.
pub const MAX_PRESIZED_SLOTS: u64 = 1 << 28;
/// Default padding on the largest node separation of an element when
/// estimating its search range.
pub const DEFAULT_SEARCH_RANGE_FACTOR: f64 = 1.1;

/// Runtime configuration for the binning subsystem.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Interaction cutoff.
    pub cutoff: f64,
    /// Extra distance beyond the cutoff that delays rebuilds.
    pub skin: f64,
    pub quadrature_order: QuadratureOrder,
    /// Sample exactly one unit-cell layer below every element face.
    #[serde(default)]
    pub one_layer: bool,
    /// Largest number of phases any element may carry.
    pub max_poly: usize,
    /// User override of the target cell size.
    #[serde(default)]
    pub bin_size: Option<f64>,
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
    #[serde(default = "default_cell_capacity")]
    pub cell_capacity: usize,
    #[serde(default = "default_cell_growth")]
    pub cell_growth: usize,
    #[serde(default = "default_search_range_factor")]
    pub search_range_factor: f64,
    /// Number of steps between rebuilds.
    pub rebuild_every: u64,
    /// Where the binary writes its summary, if anywhere.
    #[serde(default)]
    pub output: Option<String>,
    pub system: SystemSpec,
}

/// Description of the synthetic system built by the `cacbin` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SystemSpec {
    /// Number of elements along each axis of the element block.
    pub elements: [usize; 3],
    /// Unit cells per element edge.
    pub element_scale: [u32; 3],
    pub lattice_constant: f64,
    #[serde(default = "default_phases")]
    pub phases: usize,
    /// Number of point particles scattered through the box.
    pub atoms: usize,
    /// Maximum random displacement applied to nodes and atoms per step.
    #[serde(default)]
    pub jitter: f64,
    /// Tilt factors xy, xz and yz. All zero gives an orthogonal box.
    #[serde(default)]
    pub tilt: [f64; 3],
    #[serde(default = "default_periodic")]
    pub periodic: [bool; 3],
    /// Empty space between the element block and the box faces.
    #[serde(default)]
    pub vacuum: f64,
    pub steps: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_cells() -> usize {
    DEFAULT_MAX_CELLS
}

fn default_cell_capacity() -> usize {
    DEFAULT_CELL_CAPACITY
}

fn default_cell_growth() -> usize {
    DEFAULT_CELL_GROWTH
}

fn default_search_range_factor() -> f64 {
    DEFAULT_SEARCH_RANGE_FACTOR
}

fn default_phases() -> usize {
    1
}

fn default_periodic() -> [bool; 3] {
    [true; 3]
}

impl Settings {
    /// Cutoff plus skin, the distance neighbor candidates must cover.
    pub fn neighbor_cutoff(&self) -> f64 {
        self.cutoff + self.skin
    }

    /// Parses settings from an inline TOML document and validates them.
    pub fn from_toml_str(doc: &str) -> Result<Settings> {
        let settings: Settings = toml::from_str(doc).context("could not parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every field for values the binning code cannot work with.
    pub fn validate(&self) -> std::result::Result<(), BinError> {
        if !(self.cutoff.is_finite() && self.cutoff > 0.0) {
            return Err(BinError::configuration("cutoff must be positive"));
        }
        if !(self.skin.is_finite() && self.skin >= 0.0) {
            return Err(BinError::configuration("skin must be non-negative"));
        }
        if self.max_poly == 0 {
            return Err(BinError::configuration("max_poly must be at least 1"));
        }
        if let Some(size) = self.bin_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(BinError::configuration("bin_size must be positive"));
            }
        }
        if self.max_cells == 0 {
            return Err(BinError::configuration("max_cells must be at least 1"));
        }
        if self.cell_capacity == 0 || self.cell_growth == 0 {
            return Err(BinError::configuration(
                "cell_capacity and cell_growth must be at least 1",
            ));
        }
        if !(self.search_range_factor.is_finite() && self.search_range_factor >= 1.0) {
            return Err(BinError::configuration(
                "search_range_factor must be at least 1",
            ));
        }
        if self.rebuild_every == 0 {
            return Err(BinError::configuration("rebuild_every must be at least 1"));
        }
        if self.system.element_scale.iter().any(|&s| s == 0) {
            return Err(BinError::configuration(
                "system.element_scale must be at least 1 on every axis",
            ));
        }
        if self.system.phases == 0 || self.system.phases > self.max_poly {
            return Err(BinError::configuration(format!(
                "system.phases must lie in 1..={}",
                self.max_poly
            )));
        }
        if !(self.system.lattice_constant.is_finite() && self.system.lattice_constant > 0.0) {
            return Err(BinError::configuration(
                "system.lattice_constant must be positive",
            ));
        }
        Ok(())
    }
}

/// Loads `config/default.toml` only, ignoring local overrides, the
/// environment and the command line.
pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let settings: Settings = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("error loading configuration")?
        .try_deserialize()
        .context("error deserializing configuration")?;

    settings.validate()?;
    Ok(settings)
}

/// Loads the layered configuration: `config/local.toml` if present, else
/// `config/default.toml`, then `CACBIN_*` environment variables, then
/// command-line overrides.
pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    let config_file = if local_config.exists() {
        log::info!("using local configuration: {:?}", local_config);
        local_config
    } else {
        log::info!("using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let mut config: Settings = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(Environment::with_prefix("cacbin").separator("__"))
        .build()
        .context("error loading configuration")?
        .try_deserialize()
        .context("error deserializing configuration")?;

    let args = CliArgs::parse();

    if let Some(cutoff) = args.cutoff {
        config.cutoff = cutoff;
    }
    if let Some(skin) = args.skin {
        config.skin = skin;
    }
    if let Some(order) = args.order {
        config.quadrature_order = QuadratureOrder::try_from(order)?;
    }
    if args.one_layer {
        config.one_layer = true;
    }
    if let Some(size) = args.bin_size {
        config.bin_size = Some(size);
    }
    if let Some(every) = args.every {
        config.rebuild_every = every;
    }
    if let Some(steps) = args.steps {
        config.system.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.system.seed = Some(seed);
    }
    if let Some(atoms) = args.atoms {
        config.system.atoms = atoms;
    }
    if let Some(output) = args.output {
        config.output = Some(output);
    }

    config.validate()?;

    log::debug!("{:#?}", config);

    Ok(config)
}

/// Finds the directory holding `config/`.
/// 1. `CARGO_MANIFEST_DIR`, when run through cargo.
/// 2. `CACBIN_ROOT_DIR`, when set explicitly.
/// 3. The nearest ancestor of the executable that contains a `config` directory.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("CACBIN_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("failed to get current executable path")?;
    let mut current_dir = exe_path.parent();
    while let Some(dir) = current_dir {
        if dir.join("config").is_dir() {
            return Ok(dir.to_path_buf());
        }
        current_dir = dir.parent();
    }
    Err(anyhow!("could not find a project root containing config/"))
}

#[derive(Parser, Debug)]
#[command(version, about = "cacbin - neighbor binning for atoms and finite elements")]
pub struct CliArgs {
    /// Interaction cutoff.
    #[arg(long)]
    cutoff: Option<f64>,

    /// Neighbor skin distance added to the cutoff.
    #[arg(long)]
    skin: Option<f64>,

    /// Gauss quadrature order used for element interiors (1 or 2).
    #[arg(long)]
    order: Option<u8>,

    /// Sample a single unit-cell layer below every element face.
    #[arg(long)]
    one_layer: bool,

    /// Override the target cell size.
    #[arg(long)]
    bin_size: Option<f64>,

    /// Number of steps between rebuilds.
    #[arg(long)]
    every: Option<u64>,

    /// Number of steps to simulate.
    #[arg(long)]
    steps: Option<u64>,

    /// Random seed for the synthetic system.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of point particles in the synthetic system.
    #[arg(short, long)]
    atoms: Option<usize>,

    /// File the final rebuild summary is written to, as JSON.
    #[arg(short, long)]
    output: Option<String>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Cutoff: {:.6}
  - Skin: {:.6}
  - Quadrature Order: {}
  - One Layer: {}
  - Max Poly: {}
  - Bin Size: {:?}
  - Rebuild Every: {}
  ",
            self.cutoff,
            self.skin,
            self.quadrature_order.node_count(),
            self.one_layer,
            self.max_poly,
            self.bin_size,
            self.rebuild_every,
        )
    }
}
