//! Key faces: what a control shows, and the frames sent to decks.
//!
//! Rendering happens in two steps. A control first resolves its representation
//! into [`DisplayParams`], a plain hashable description of the face (text
//! already formatted, icon already picked, lit parts already decided). The
//! [`Renderer`] then hashes those parameters into a [`Fingerprint`] and asks the
//! shared [`FrameCache`] for the frame, drawing it only when no other request
//! for that fingerprint got there first.

use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use dashmap::DashMap;
use embedded_graphics::pixelcolor::Rgb888;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

mod bitmap;
mod cache;
mod chart;
mod draw;
mod representation;

pub use bitmap::Bitmap;
pub use cache::FrameCache;
pub use representation::{
    AnnunciatorLayout, AnnunciatorPartConfig, ChartSeriesConfig, IndexSource, LedMark,
    RepresentationConfig, TextFaceConfig,
};

pub(crate) use chart::ChartState;
pub(crate) use representation::{Representation, ResolveContext};

use crate::control::Control;
use crate::formula::OperatorTable;
use crate::variables::VariableStore;

/// 24 bit color.
///
/// Configured as `#rrggbb`, a few names, or `[r, g, b]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColorSpec", into = "ColorSpec")]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ColorSpec {
    Named(String),
    Rgb([u8; 3]),
}

impl Color {
    /// Black
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    /// White
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    /// Annunciator amber
    pub const AMBER: Color = Color::rgb(255, 191, 0);
    /// Unlit part grey
    pub const DARK_GREY: Color = Color::rgb(40, 40, 40);
    /// Guard cover stripes
    pub const GUARD: Color = Color::rgb(200, 30, 30);

    /// Build from components
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn named(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "black" => Color::BLACK,
            "white" => Color::WHITE,
            "red" => Color::rgb(255, 0, 0),
            "green" | "lime" => Color::rgb(0, 255, 0),
            "blue" => Color::rgb(0, 0, 255),
            "yellow" => Color::rgb(255, 255, 0),
            "orange" => Color::rgb(255, 165, 0),
            "amber" => Color::AMBER,
            "cyan" => Color::rgb(0, 255, 255),
            "magenta" => Color::rgb(255, 0, 255),
            "grey" | "gray" => Color::rgb(128, 128, 128),
            "darkgrey" | "darkgray" => Color::DARK_GREY,
            _ => return None,
        })
    }

    fn hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('#')?;
        if digits.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(digits, 16).ok()?;
        Some(Color::rgb(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ))
    }

    /// Relative luminance, 0..=255
    pub(crate) fn luma(&self) -> u8 {
        ((u32::from(self.r) * 299 + u32::from(self.g) * 587 + u32::from(self.b) * 114) / 1000) as u8
    }

    /// Black or white, whichever reads best on this color
    pub(crate) fn contrast(&self) -> Color {
        if self.luma() > 140 {
            Color::BLACK
        } else {
            Color::WHITE
        }
    }
}

impl TryFrom<ColorSpec> for Color {
    type Error = String;

    fn try_from(spec: ColorSpec) -> Result<Self, Self::Error> {
        match spec {
            ColorSpec::Rgb([r, g, b]) => Ok(Color::rgb(r, g, b)),
            ColorSpec::Named(name) => Color::hex(&name)
                .or_else(|| Color::named(&name))
                .ok_or_else(|| format!("unknown color {name}")),
        }
    }
}

impl From<Color> for ColorSpec {
    fn from(color: Color) -> Self {
        ColorSpec::Named(format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b))
    }
}

impl From<Color> for Rgb888 {
    fn from(color: Color) -> Self {
        Rgb888::new(color.r, color.g, color.b)
    }
}

/// Resolved state of one annunciator part
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartFace {
    /// Formatted text
    pub text: String,
    /// Whether the part is lit
    pub lit: bool,
    /// Face color, already chosen from lit / off colors
    pub color: Color,
    /// LED mark
    pub led: LedMark,
}

/// Resolved state of one chart series
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SeriesFace {
    /// Line color
    pub color: Color,
    /// Y pixel of each sample, oldest first
    pub points: Vec<u32>,
}

/// What a key shows, fully resolved
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    /// Nothing
    Blank,
    /// An icon from the library
    Icon {
        /// Icon name
        icon: String,
        /// Fill behind a missing or transparent icon
        background: Color,
    },
    /// Text, optionally over an icon
    Text {
        /// Formatted text, may span lines
        text: String,
        /// Text color
        color: Color,
        /// Fill
        background: Color,
        /// Icon drawn behind the text
        icon: Option<String>,
    },
    /// A single LED
    Led {
        /// Lit
        lit: bool,
        /// Current color
        color: Color,
    },
    /// One or two lit/unlit parts
    Annunciator {
        /// Arrangement
        layout: AnnunciatorLayout,
        /// Part A then optional part B
        parts: Vec<PartFace>,
    },
    /// Bar gauge
    Gauge {
        /// Fill in thousandths
        permille: u16,
        /// Bar color
        color: Color,
        /// Formatted value
        label: String,
    },
    /// Sampled series
    Chart {
        /// One entry per series
        series: Vec<SeriesFace>,
    },
    /// A sound cue; a new `cue` means play again
    Sound {
        /// Sound name
        sound: String,
        /// Sound type
        kind: String,
        /// Changes whenever the sound should play
        cue: u64,
    },
}

impl Face {
    /// Representation tag, part of the fingerprint
    pub fn tag(&self) -> &'static str {
        match self {
            Face::Blank => "blank",
            Face::Icon { .. } => "icon",
            Face::Text { .. } => "text",
            Face::Led { .. } => "led",
            Face::Annunciator { .. } => "annunciator",
            Face::Gauge { .. } => "gauge",
            Face::Chart { .. } => "chart",
            Face::Sound { .. } => "sound",
        }
    }
}

/// Resolved display parameters of a control
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayParams {
    /// The face
    pub face: Face,
    /// Hatched guard cover drawn on top
    pub covered: bool,
}

impl DisplayParams {
    /// The empty face
    pub fn blank() -> Self {
        Self {
            face: Face::Blank,
            covered: false,
        }
    }

    /// Hash of the representation tag, the key size and the parameters
    pub fn fingerprint(&self, key_size: (u32, u32)) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.face.tag().hash(&mut hasher);
        key_size.hash(&mut hasher);
        self.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

/// Cache key of a rendered frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A sound to play on the deck
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SoundCue {
    /// Sound name
    pub sound: String,
    /// Sound type
    pub kind: String,
}

/// Rendered output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameContent {
    /// Nothing to show
    Blank,
    /// Key image
    Bitmap(Bitmap),
    /// LED color, with an image for decks that draw their LEDs
    Led {
        /// Color to light
        pattern: Color,
        /// Picture of the LED
        preview: Bitmap,
    },
    /// Sound to play
    Sound(SoundCue),
}

/// One cached frame, possibly shared by several controls
#[derive(Debug)]
pub struct RenderedFrame {
    /// Control that rendered it first
    pub control_id: String,
    /// Cache key
    pub fingerprint: Fingerprint,
    /// Key size it was drawn for
    pub key_size: (u32, u32),
    /// The output
    pub content: FrameContent,
}

impl RenderedFrame {
    /// Image to send for this frame; blank frames become a black image
    pub fn image(&self) -> Option<Bitmap> {
        match &self.content {
            FrameContent::Blank => Some(Bitmap::new(self.key_size.0, self.key_size.1)),
            FrameContent::Bitmap(bitmap) => Some(bitmap.clone()),
            FrameContent::Led { preview, .. } => Some(preview.clone()),
            FrameContent::Sound(_) => None,
        }
    }
}

/// Source of icon bitmaps
pub trait IconLibrary: Send + Sync {
    /// Bitmap for an icon name
    fn icon(&self, name: &str) -> Option<Arc<Bitmap>>;
}

/// In-memory [`IconLibrary`]
#[derive(Default, Debug)]
pub struct IconSet {
    icons: DashMap<String, Arc<Bitmap>>,
}

impl IconSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an icon
    pub fn insert(&self, name: impl Into<String>, bitmap: Bitmap) {
        self.icons.insert(name.into(), Arc::new(bitmap));
    }
}

impl IconLibrary for IconSet {
    fn icon(&self, name: &str) -> Option<Arc<Bitmap>> {
        self.icons.get(name).map(|icon| icon.clone())
    }
}

/// Turns controls into frames through the shared cache
pub struct Renderer {
    cache: Arc<FrameCache>,
    icons: Arc<dyn IconLibrary>,
    operators: Arc<OperatorTable>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Renderer [{} cached frames]", self.cache.len())
    }
}

/// Cache owner of a key: key names only need to be unique within their deck
pub fn frame_owner(deck: &str, key: &str) -> String {
    format!("{deck}/{key}")
}

impl Renderer {
    /// Renderer over a cache, an icon library and the formula operators
    pub fn new(
        cache: Arc<FrameCache>,
        icons: Arc<dyn IconLibrary>,
        operators: Arc<OperatorTable>,
    ) -> Self {
        Self {
            cache,
            icons,
            operators,
        }
    }

    /// The frame cache
    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Operators used when resolving formulas
    pub fn operators(&self) -> &OperatorTable {
        &self.operators
    }

    /// Current frame of a control, cached under `owner`.
    ///
    /// `owner` names the key across the whole cockpit, see [`frame_owner`].
    /// When the control cannot be resolved its last good frame is kept, or the
    /// blank frame if it never had one.
    pub fn render(&self, owner: &str, control: &mut Control, store: &VariableStore) -> Arc<RenderedFrame> {
        match control.resolve(store, &self.operators) {
            Ok(params) => {
                let frame = self.frame(owner, control.key_size(), &params);
                control.remember_frame(frame.clone());
                frame
            }
            Err(err) => {
                trace!("{} kept its last frame: {}", owner, err);
                match control.last_frame() {
                    Some(frame) => frame.clone(),
                    None => self.frame(owner, control.key_size(), &DisplayParams::blank()),
                }
            }
        }
    }

    /// Blank frame for a key without control
    pub fn blank(&self, owner: &str, key_size: (u32, u32)) -> Arc<RenderedFrame> {
        self.frame(owner, key_size, &DisplayParams::blank())
    }

    /// Frame for resolved parameters, drawn at most once per fingerprint
    pub fn frame(&self, owner: &str, key_size: (u32, u32), params: &DisplayParams) -> Arc<RenderedFrame> {
        let fingerprint = params.fingerprint(key_size);
        self.cache.get_or_render(owner, fingerprint, || {
            debug!("Drawing {} frame {} for {}", params.face.tag(), fingerprint, owner);
            RenderedFrame {
                control_id: owner.to_string(),
                fingerprint,
                key_size,
                content: draw::draw(params, key_size, self.icons.as_ref()),
            }
        })
    }

    /// Forget the frames a key was holding
    pub fn release(&self, owner: &str) {
        self.cache.forget(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_parse_from_hex_names_and_triples() {
        let colors: Vec<Color> =
            serde_json::from_str(r##"["#ff8000", "amber", [1, 2, 3], "White"]"##).unwrap();
        assert_eq!(
            colors,
            vec![
                Color::rgb(255, 128, 0),
                Color::AMBER,
                Color::rgb(1, 2, 3),
                Color::WHITE
            ]
        );
        assert!(serde_json::from_str::<Color>(r#""mauve""#).is_err());
        assert_eq!(serde_json::to_string(&Color::AMBER).unwrap(), r##""#ffbf00""##);
    }

    #[test]
    fn fingerprint_depends_on_size_and_cover() {
        let params = DisplayParams {
            face: Face::Led {
                lit: true,
                color: Color::AMBER,
            },
            covered: false,
        };
        let covered = DisplayParams {
            covered: true,
            ..params.clone()
        };
        assert_eq!(params.fingerprint((96, 96)), params.clone().fingerprint((96, 96)));
        assert_ne!(params.fingerprint((96, 96)), params.fingerprint((72, 72)));
        assert_ne!(params.fingerprint((96, 96)), covered.fingerprint((96, 96)));
    }

    #[test]
    fn blank_frames_become_black_images() {
        let renderer = Renderer::new(
            Arc::new(FrameCache::new(4)),
            Arc::new(IconSet::new()),
            Arc::new(OperatorTable::default()),
        );
        let frame = renderer.blank("3", (4, 2));
        let image = frame.image().unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        assert!(image.data().iter().all(|b| *b == 0));
        assert!(Arc::ptr_eq(&frame, &renderer.blank("3", (4, 2))));
    }

    #[test]
    fn same_key_name_on_two_decks_keeps_separate_history() {
        let renderer = Renderer::new(
            Arc::new(FrameCache::new(1)),
            Arc::new(IconSet::new()),
            Arc::new(OperatorTable::default()),
        );
        let led = |lit| DisplayParams {
            face: Face::Led {
                lit,
                color: Color::AMBER,
            },
            covered: false,
        };
        let left = frame_owner("left", "0");
        let right = frame_owner("right", "0");
        assert_ne!(left, right);

        let first = renderer.frame(&left, (8, 8), &led(true));
        renderer.frame(&right, (8, 8), &led(false));
        let again = renderer.frame(&left, (8, 8), &led(true));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(renderer.cache().renders(), 2);

        renderer.release(&left);
        renderer.release(&right);
        assert!(renderer.cache().is_empty());
    }
}
