use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{ChartState, Color, DisplayParams, Face, PartFace};
use crate::activation::ActivationState;
use crate::config::seconds;
use crate::error::{ConfigError, ConfigResult};
use crate::formula::{
    EvaluationError, Formula, NumberFormat, OperatorTable, TextTemplate, evaluate, format_value,
};
use crate::variables::{Value, VariableStore};

fn white() -> Color {
    Color::WHITE
}

fn amber() -> Color {
    Color::AMBER
}

fn dark_grey() -> Color {
    Color::DARK_GREY
}

fn green() -> Color {
    Color::rgb(0, 255, 0)
}

fn hundred() -> f64 {
    100.0
}

fn default_keep() -> usize {
    10
}

fn default_update() -> Duration {
    Duration::from_secs(1)
}

fn default_sound_kind() -> String {
    "wav".to_string()
}

/// What selects the entry of a multi icon or multi text representation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexSource {
    /// Formula result, modulo the entry count
    Formula,
    /// Activation count, modulo the entry count
    #[default]
    Count,
    /// Step of a stepped activation
    Step,
    /// Frame of an animation
    Frame,
}

/// Text with colors
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextFaceConfig {
    /// Template, see [`TextTemplate`]
    pub text: String,
    /// Text color
    #[serde(default = "white")]
    pub color: Color,
    /// Fill
    #[serde(default)]
    pub background: Color,
}

/// How the parts of an annunciator share the face
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnunciatorLayout {
    /// Both parts cover the face, B over A
    #[default]
    Full,
    /// A on the top half, B on the bottom half
    Split,
}

/// LED mark drawn on an annunciator part
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedMark {
    /// No mark
    #[default]
    None,
    /// Horizontal bar under the text
    Bar,
    /// Dot above the text
    Dot,
}

/// One annunciator part
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnunciatorPartConfig {
    /// Text template
    #[serde(default)]
    pub text: String,
    /// Lit when the result is positive; the control formula when absent
    #[serde(default)]
    pub formula: Option<String>,
    /// Lit color
    #[serde(default = "amber")]
    pub color: Color,
    /// Unlit color
    #[serde(default = "dark_grey")]
    pub off_color: Color,
    /// LED mark
    #[serde(default)]
    pub led: LedMark,
}

/// One chart series
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSeriesConfig {
    /// Sampled formula
    pub formula: String,
    /// Bottom of the chart
    #[serde(default)]
    pub min: f64,
    /// Top of the chart
    #[serde(default = "hundred")]
    pub max: f64,
    /// Line color
    #[serde(default = "white")]
    pub color: Color,
}

/// How a control shows itself, as found in the layout configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RepresentationConfig {
    /// Shows nothing
    #[default]
    None,
    /// A fixed icon
    Icon {
        /// Icon name
        icon: String,
        /// Fill behind the icon
        #[serde(default)]
        background: Color,
    },
    /// One of several icons
    MultiIcons {
        /// Icon names
        icons: Vec<String>,
        /// Selector
        #[serde(default)]
        index: IndexSource,
    },
    /// Formatted text
    Text {
        /// Template, see [`TextTemplate`]
        text: String,
        /// Text color
        #[serde(default = "white")]
        color: Color,
        /// Fill
        #[serde(default)]
        background: Color,
        /// Icon behind the text
        #[serde(default)]
        icon: Option<String>,
    },
    /// One of several texts
    MultiTexts {
        /// Entries
        texts: Vec<TextFaceConfig>,
        /// Selector
        #[serde(default)]
        index: IndexSource,
    },
    /// A single LED, lit by the formula or the on/pressed state
    Led {
        /// Lit color
        #[serde(default = "green")]
        color: Color,
        /// Unlit color
        #[serde(default)]
        off_color: Color,
    },
    /// One or two lit/unlit parts
    Annunciator {
        /// Arrangement
        #[serde(default)]
        layout: AnnunciatorLayout,
        /// Part A and optional part B
        parts: Vec<AnnunciatorPartConfig>,
    },
    /// Bar gauge of the formula result
    Gauge {
        /// Empty bar value
        #[serde(default)]
        min: f64,
        /// Full bar value
        #[serde(default = "hundred")]
        max: f64,
        /// Bar color
        #[serde(default = "white")]
        color: Color,
    },
    /// Sampled line chart
    Chart {
        /// Series
        series: Vec<ChartSeriesConfig>,
        /// Samples kept per series
        #[serde(default = "default_keep")]
        keep: usize,
        /// Sampling period
        #[serde(with = "seconds", default = "default_update")]
        update: Duration,
    },
    /// Plays a sound when the formula result or the activation count changes
    Sound {
        /// Sound name
        sound: String,
        /// Sound type
        #[serde(default = "default_sound_kind")]
        kind: String,
    },
}

#[derive(Debug)]
pub(crate) struct TextFace {
    template: TextTemplate,
    color: Color,
    background: Color,
}

impl TextFace {
    fn new(text: &str, color: Color, background: Color) -> Self {
        Self {
            template: TextTemplate::new(text),
            color,
            background,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Part {
    template: TextTemplate,
    formula: Option<Formula>,
    color: Color,
    off_color: Color,
    led: LedMark,
}

/// Everything a representation may look at while resolving
pub(crate) struct ResolveContext<'a> {
    pub(crate) store: &'a VariableStore,
    pub(crate) operators: &'a OperatorTable,
    /// Control formula result; `None` when the control has no formula
    pub(crate) formula_value: Option<&'a Value>,
    pub(crate) format: Option<&'a NumberFormat>,
    pub(crate) state: &'a ActivationState,
    pub(crate) key_size: (u32, u32),
}

impl ResolveContext<'_> {
    fn text(&self, template: &TextTemplate, value: Option<&Value>) -> String {
        template.render(self.store, value.or(self.formula_value), self.format)
    }

    /// On/off without a formula: the toggle state, else the press state
    fn switched_on(&self) -> bool {
        self.state.on.unwrap_or(self.state.pressed)
    }

    fn index(&self, source: IndexSource, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let raw = match source {
            IndexSource::Formula => match self.formula_value.and_then(Value::as_number) {
                Some(value) => return (value.floor() as i64).rem_euclid(count as i64) as usize,
                None => self.state.count as usize,
            },
            IndexSource::Count => (self.state.count % count as u64) as usize,
            IndexSource::Step => self.state.step.unwrap_or(0),
            IndexSource::Frame => self.state.frame.unwrap_or(0),
        };
        raw % count
    }
}

/// Runtime form of [`RepresentationConfig`], with formulas parsed
#[derive(Debug)]
pub(crate) enum Representation {
    None,
    Icon { icon: String, background: Color },
    MultiIcons { icons: Vec<String>, index: IndexSource },
    Text { face: TextFace, icon: Option<String> },
    MultiTexts { faces: Vec<TextFace>, index: IndexSource },
    Led { color: Color, off_color: Color },
    Annunciator { layout: AnnunciatorLayout, parts: Vec<Part> },
    Gauge { min: f64, max: f64, color: Color },
    Chart(ChartState),
    Sound { sound: String, kind: String },
}

fn parse(control: &str, text: &str) -> ConfigResult<Formula> {
    Formula::parse(text).map_err(|source| ConfigError::Formula {
        control: control.to_string(),
        source,
    })
}

fn invalid(control: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        control: control.to_string(),
        reason: reason.to_string(),
    }
}

impl Representation {
    pub(crate) fn from_config(control: &str, config: &RepresentationConfig) -> ConfigResult<Self> {
        Ok(match config {
            RepresentationConfig::None => Representation::None,
            RepresentationConfig::Icon { icon, background } => Representation::Icon {
                icon: icon.clone(),
                background: *background,
            },
            RepresentationConfig::MultiIcons { icons, index } => {
                if icons.is_empty() {
                    return Err(invalid(control, "multi-icons needs at least one icon"));
                }
                Representation::MultiIcons {
                    icons: icons.clone(),
                    index: *index,
                }
            }
            RepresentationConfig::Text {
                text,
                color,
                background,
                icon,
            } => Representation::Text {
                face: TextFace::new(text, *color, *background),
                icon: icon.clone(),
            },
            RepresentationConfig::MultiTexts { texts, index } => {
                if texts.is_empty() {
                    return Err(invalid(control, "multi-texts needs at least one text"));
                }
                Representation::MultiTexts {
                    faces: texts
                        .iter()
                        .map(|t| TextFace::new(&t.text, t.color, t.background))
                        .collect(),
                    index: *index,
                }
            }
            RepresentationConfig::Led { color, off_color } => Representation::Led {
                color: *color,
                off_color: *off_color,
            },
            RepresentationConfig::Annunciator { layout, parts } => {
                if parts.is_empty() || parts.len() > 2 {
                    return Err(invalid(control, "annunciator needs one or two parts"));
                }
                let parts = parts
                    .iter()
                    .map(|part| {
                        Ok(Part {
                            template: TextTemplate::new(part.text.clone()),
                            formula: part.formula.as_deref().map(|f| parse(control, f)).transpose()?,
                            color: part.color,
                            off_color: part.off_color,
                            led: part.led,
                        })
                    })
                    .collect::<ConfigResult<Vec<_>>>()?;
                Representation::Annunciator {
                    layout: *layout,
                    parts,
                }
            }
            RepresentationConfig::Gauge { min, max, color } => {
                if !(min < max) {
                    return Err(ConfigError::InvalidRange {
                        control: control.to_string(),
                    });
                }
                Representation::Gauge {
                    min: *min,
                    max: *max,
                    color: *color,
                }
            }
            RepresentationConfig::Chart {
                series,
                keep,
                update,
            } => {
                if series.is_empty() {
                    return Err(invalid(control, "chart needs at least one series"));
                }
                let mut formulas = Vec::with_capacity(series.len());
                for s in series {
                    if !(s.min < s.max) {
                        return Err(ConfigError::InvalidRange {
                            control: control.to_string(),
                        });
                    }
                    formulas.push((parse(control, &s.formula)?, s.min, s.max, s.color));
                }
                Representation::Chart(ChartState::new(formulas, (*keep).max(1), *update))
            }
            RepresentationConfig::Sound { sound, kind } => Representation::Sound {
                sound: sound.clone(),
                kind: kind.clone(),
            },
        })
    }

    /// Variables the face depends on besides the control formula
    pub(crate) fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut add = |more: Vec<String>| {
            for name in more {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        };
        match self {
            Representation::Text { face, .. } => add(face.template.variables()),
            Representation::MultiTexts { faces, .. } => {
                for face in faces {
                    add(face.template.variables());
                }
            }
            Representation::Annunciator { parts, .. } => {
                for part in parts {
                    add(part.template.variables());
                    if let Some(formula) = &part.formula {
                        add(formula.variables().into_iter().map(str::to_string).collect());
                    }
                }
            }
            Representation::Chart(chart) => add(chart.variables()),
            _ => {}
        }
        names
    }

    /// Timer work: chart sampling
    pub(crate) fn tick(&mut self, now: Instant, store: &VariableStore, operators: &OperatorTable) {
        if let Representation::Chart(chart) = self {
            chart.sample(now, store, operators);
        }
    }

    pub(crate) fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<DisplayParams, EvaluationError> {
        let face = match self {
            Representation::None => Face::Blank,
            Representation::Icon { icon, background } => Face::Icon {
                icon: icon.clone(),
                background: *background,
            },
            Representation::MultiIcons { icons, index } => Face::Icon {
                icon: icons[ctx.index(*index, icons.len())].clone(),
                background: Color::BLACK,
            },
            Representation::Text { face, icon } => Face::Text {
                text: ctx.text(&face.template, None),
                color: face.color,
                background: face.background,
                icon: icon.clone(),
            },
            Representation::MultiTexts { faces, index } => {
                let face = &faces[ctx.index(*index, faces.len())];
                Face::Text {
                    text: ctx.text(&face.template, None),
                    color: face.color,
                    background: face.background,
                    icon: None,
                }
            }
            Representation::Led { color, off_color } => {
                let lit = match ctx.formula_value {
                    Some(value) => value.is_truthy(),
                    None => ctx.switched_on(),
                };
                Face::Led {
                    lit,
                    color: if lit { *color } else { *off_color },
                }
            }
            Representation::Annunciator { layout, parts } => {
                let mut faces = Vec::with_capacity(parts.len());
                for part in parts {
                    let own = part
                        .formula
                        .as_ref()
                        .map(|f| evaluate(f, ctx.store, ctx.operators))
                        .transpose()?;
                    let value = own.as_ref().or(ctx.formula_value);
                    let lit = match value {
                        Some(value) => value.as_number().is_some_and(|v| v > 0.0),
                        None => ctx.switched_on(),
                    };
                    faces.push(PartFace {
                        text: ctx.text(&part.template, own.as_ref()),
                        lit,
                        color: if lit { part.color } else { part.off_color },
                        led: part.led,
                    });
                }
                Face::Annunciator {
                    layout: *layout,
                    parts: faces,
                }
            }
            Representation::Gauge { min, max, color } => {
                let value = match ctx.formula_value {
                    Some(value) => value
                        .as_number()
                        .ok_or(EvaluationError::TypeMismatch {
                            operator: "gauge".to_string(),
                        })?,
                    None => ctx.state.value.unwrap_or(*min),
                };
                let fraction = ((value - min) / (max - min)).clamp(0.0, 1.0);
                Face::Gauge {
                    permille: (fraction * 1000.0).round() as u16,
                    color: *color,
                    label: format_value(&Value::Number(value), ctx.format),
                }
            }
            Representation::Chart(chart) => Face::Chart {
                series: chart.faces(ctx.key_size.1),
            },
            Representation::Sound { sound, kind } => {
                let cue = match ctx.formula_value.and_then(Value::as_number) {
                    Some(value) => value.max(0.0) as u64,
                    None => ctx.state.count,
                };
                Face::Sound {
                    sound: sound.clone(),
                    kind: kind.clone(),
                    cue,
                }
            }
        };
        Ok(DisplayParams {
            face,
            covered: ctx.state.guard_open == Some(false),
        })
    }
}
