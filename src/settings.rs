use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::config::{
    DEFAULT_BACKGROUND_ID, DEFAULT_EXPORT_DIR, DEFAULT_HIGH_COVERAGE_THRESHOLD,
    DEFAULT_IMAGE_EXTENSION, DEFAULT_MASK_EXTENSION, DEFAULT_OVERLAY_ALPHA,
    DEFAULT_SELECTION_DIR,
};

/// User-specific settings that persist across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Directory holding `selected_<dataset>.json` files
    #[serde(default = "default_selection_dir")]
    pub selection_dir: PathBuf,

    /// Root directory for exported frames
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Extension of the original images next to each annotation entry
    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    /// Extension of the panoptic mask files
    #[serde(default = "default_mask_extension")]
    pub mask_extension: String,

    /// Panoptic id treated as unlabeled when computing coverage
    #[serde(default)]
    pub background_id: u32,

    /// Coverage percentage above which a frame counts as "high coverage"
    #[serde(default = "default_high_coverage_threshold")]
    pub high_coverage_threshold: f64,

    /// Blend factor of segment colors over the original image
    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,
}

fn default_selection_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SELECTION_DIR)
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(DEFAULT_EXPORT_DIR)
}

fn default_image_extension() -> String {
    DEFAULT_IMAGE_EXTENSION.to_string()
}

fn default_mask_extension() -> String {
    DEFAULT_MASK_EXTENSION.to_string()
}

fn default_high_coverage_threshold() -> f64 {
    DEFAULT_HIGH_COVERAGE_THRESHOLD
}

fn default_overlay_alpha() -> f32 {
    DEFAULT_OVERLAY_ALPHA
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            selection_dir: default_selection_dir(),
            export_dir: default_export_dir(),
            image_extension: default_image_extension(),
            mask_extension: default_mask_extension(),
            background_id: DEFAULT_BACKGROUND_ID,
            high_coverage_threshold: default_high_coverage_threshold(),
            overlay_alpha: default_overlay_alpha(),
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/PanopticCurator/settings.yaml
    /// On Linux: ~/.config/PanopticCurator/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\PanopticCurator\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join("PanopticCurator").join("settings.yaml")
    }

    /// Load settings from the YAML file
    /// If custom_path is provided, uses that path; otherwise uses the default settings path
    pub fn load(custom_path: Option<&Path>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {}", p.display());
                p.to_path_buf()
            }
            None => Self::settings_path(),
        };

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                error!("Failed to parse settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }),
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Parse settings from YAML, sanitizing out-of-range values
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let mut settings = serde_yaml::from_str::<UserSettings>(contents)?;
        if !(0.0..=1.0).contains(&settings.overlay_alpha) {
            warn!("overlay_alpha {} out of range, clamping to [0, 1]", settings.overlay_alpha);
            settings.overlay_alpha = settings.overlay_alpha.clamp(0.0, 1.0);
        }
        settings.image_extension = settings.image_extension.trim_start_matches('.').to_string();
        settings.mask_extension = settings.mask_extension.trim_start_matches('.').to_string();
        debug!("Settings: selection_dir={:?}, image_ext={}, mask_ext={}, background_id={}",
            settings.selection_dir, settings.image_extension, settings.mask_extension, settings.background_id);
        Ok(settings)
    }

    /// Save settings to `path` (or the default location) with explanatory comments
    pub fn save(&self, custom_path: Option<&Path>) -> Result<PathBuf, std::io::Error> {
        let path = custom_path.map(Path::to_path_buf).unwrap_or_else(Self::settings_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(&path, self.to_yaml_with_comments())?;
        info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Generate YAML content with comments for new files
    fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# Panoptic Curator User Settings
# Settings specified here override the built-in defaults.

# Directory holding selected_<dataset>.json selection files
selection_dir: {}

# Root directory for exported frames
export_dir: {}

# File extensions of original images and panoptic masks
image_extension: {}
mask_extension: {}

# Panoptic id of unlabeled pixels (excluded from coverage)
background_id: {}

# Frames with coverage strictly above this percentage pass the high-coverage filter
high_coverage_threshold: {}

# Opacity of segment colors in rendered overlays (0.0 - 1.0)
overlay_alpha: {}
"#,
            yaml_quote(&self.selection_dir.display().to_string()),
            yaml_quote(&self.export_dir.display().to_string()),
            yaml_quote(&self.image_extension),
            yaml_quote(&self.mask_extension),
            self.background_id,
            self.high_coverage_threshold,
            self.overlay_alpha
        )
    }
}

/// Single-quoted YAML scalar; backslashes stay literal
fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
