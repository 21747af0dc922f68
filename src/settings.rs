use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "renderer_settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    /// Vertical field of view in degrees.
    #[serde(default = "RendererSettings::default_field_of_view")]
    pub field_of_view: f32,
    #[serde(default = "RendererSettings::default_near_plane")]
    pub near_plane: f32,
    #[serde(default = "RendererSettings::default_far_plane")]
    pub far_plane: f32,
    #[serde(default = "RendererSettings::default_clear_color")]
    pub clear_color: [f64; 4],
    #[serde(default = "RendererSettings::default_instance_capacity")]
    pub instance_capacity: usize,
    #[serde(default = "RendererSettings::default_max_point_lights")]
    pub max_point_lights: usize,
    #[serde(default)]
    pub bloom: BloomSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            field_of_view: Self::default_field_of_view(),
            near_plane: Self::default_near_plane(),
            far_plane: Self::default_far_plane(),
            clear_color: Self::default_clear_color(),
            instance_capacity: Self::default_instance_capacity(),
            max_point_lights: Self::default_max_point_lights(),
            bloom: BloomSettings::default(),
        }
    }
}

impl RendererSettings {
    pub fn load() -> Self {
        Self::load_from_path(SETTINGS_FILE)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RendererSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded renderer settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default renderer settings.",
                        path, err
                    );
                    RendererSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Renderer settings file {:?} not found. Using default settings.",
                    path
                );
                RendererSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default renderer settings.",
                    path, err
                );
                RendererSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !(self.field_of_view > 0.0 && self.field_of_view < 180.0) {
            warn!(
                "Field of view {} is outside (0, 180). Using default value.",
                self.field_of_view
            );
            self.field_of_view = Self::default_field_of_view();
        }

        if !(self.near_plane > 0.0 && self.far_plane > self.near_plane) {
            warn!(
                "Clip planes {}..{} are invalid. Using default planes.",
                self.near_plane, self.far_plane
            );
            self.near_plane = Self::default_near_plane();
            self.far_plane = Self::default_far_plane();
        }

        if self.instance_capacity == 0 {
            warn!("Instance capacity must be greater than zero. Using default value.");
            self.instance_capacity = Self::default_instance_capacity();
        }

        if self.max_point_lights == 0 {
            warn!("Point light limit must be greater than zero. Using default value.");
            self.max_point_lights = Self::default_max_point_lights();
        }

        self.bloom = self.bloom.validate();
        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }

    const fn default_field_of_view() -> f32 {
        45.0
    }

    const fn default_near_plane() -> f32 {
        0.1
    }

    const fn default_far_plane() -> f32 {
        1000.0
    }

    const fn default_clear_color() -> [f64; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    const fn default_instance_capacity() -> usize {
        512
    }

    const fn default_max_point_lights() -> usize {
        512
    }
}

/// Bright-pass, blur and composite parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomSettings {
    /// Number of horizontal+vertical blur pass pairs.
    #[serde(default = "BloomSettings::default_passes")]
    pub passes: u32,
    #[serde(default = "BloomSettings::default_power")]
    pub power: f32,
    #[serde(default = "BloomSettings::default_exposure")]
    pub exposure: f32,
    /// Luminance above which a lit pixel feeds the bloom.
    #[serde(default = "BloomSettings::default_threshold")]
    pub threshold: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            passes: Self::default_passes(),
            power: Self::default_power(),
            exposure: Self::default_exposure(),
            threshold: Self::default_threshold(),
        }
    }
}

impl BloomSettings {
    fn validate(mut self) -> Self {
        if self.passes == 0 {
            warn!("Bloom needs at least one blur pass. Using default value.");
            self.passes = Self::default_passes();
        }
        if !(self.power >= 0.0) {
            warn!("Bloom power {} is negative. Using default value.", self.power);
            self.power = Self::default_power();
        }
        if !(self.exposure > 0.0) {
            warn!("Exposure must be greater than zero. Using default value.");
            self.exposure = Self::default_exposure();
        }
        if !(self.threshold >= 0.0) {
            warn!("Bloom threshold {} is negative. Using default value.", self.threshold);
            self.threshold = Self::default_threshold();
        }
        self
    }

    const fn default_passes() -> u32 {
        2
    }

    const fn default_power() -> f32 {
        0.003
    }

    const fn default_exposure() -> f32 {
        1.0
    }

    const fn default_threshold() -> f32 {
        1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}
