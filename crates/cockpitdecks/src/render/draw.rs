use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{
        MonoFont, MonoTextStyle,
        ascii::{FONT_6X10, FONT_10X20},
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use tracing::trace;

use super::{
    AnnunciatorLayout, Bitmap, Color, DisplayParams, Face, FrameContent, IconLibrary, LedMark,
    PartFace, SeriesFace, SoundCue,
};

const UNLIT_TEXT: Color = Color::rgb(110, 110, 110);

pub(crate) fn draw(params: &DisplayParams, key_size: (u32, u32), icons: &dyn IconLibrary) -> FrameContent {
    let (width, height) = key_size;
    let mut content = match &params.face {
        Face::Blank if !params.covered => return FrameContent::Blank,
        Face::Sound { sound, kind, .. } => {
            return FrameContent::Sound(SoundCue {
                sound: sound.clone(),
                kind: kind.clone(),
            });
        }
        Face::Led { color, .. } => {
            let mut preview = Bitmap::new(width, height);
            let Ok(()) = led(&mut preview, *color);
            FrameContent::Led {
                pattern: *color,
                preview,
            }
        }
        face => {
            let mut bitmap = Bitmap::new(width, height);
            let Ok(()) = paint(&mut bitmap, face, icons);
            FrameContent::Bitmap(bitmap)
        }
    };
    if params.covered {
        match &mut content {
            FrameContent::Bitmap(bitmap) | FrameContent::Led { preview: bitmap, .. } => {
                let Ok(()) = cover(bitmap);
            }
            FrameContent::Blank | FrameContent::Sound(_) => {}
        }
    }
    content
}

fn paint(target: &mut Bitmap, face: &Face, icons: &dyn IconLibrary) -> Result<(), Infallible> {
    let area = target.bounding_box();
    match face {
        Face::Blank | Face::Led { .. } | Face::Sound { .. } => {}
        Face::Icon { icon, background } => {
            fill(target, area, *background)?;
            self::icon(target, icon, icons)?;
        }
        Face::Text {
            text,
            color,
            background,
            icon,
        } => {
            fill(target, area, *background)?;
            if let Some(name) = icon {
                self::icon(target, name, icons)?;
            }
            label(target, text, *color, area)?;
        }
        Face::Annunciator { layout, parts } => match layout {
            AnnunciatorLayout::Full => {
                for (i, part) in parts.iter().enumerate() {
                    // B only shows over A when lit
                    if i == 0 || part.lit {
                        annunciator_part(target, part, area)?;
                    }
                }
            }
            AnnunciatorLayout::Split => {
                let half = area.size.height / 2;
                let top = Rectangle::new(area.top_left, Size::new(area.size.width, half));
                let bottom = Rectangle::new(
                    area.top_left + Point::new(0, half as i32),
                    Size::new(area.size.width, area.size.height - half),
                );
                for (part, rect) in parts.iter().zip([top, bottom]) {
                    annunciator_part(target, part, rect)?;
                }
            }
        },
        Face::Gauge {
            permille,
            color,
            label: text,
        } => gauge(target, u32::from(*permille), *color, text)?,
        Face::Chart { series } => chart(target, series)?,
    }
    Ok(())
}

fn fill(target: &mut Bitmap, area: Rectangle, color: Color) -> Result<(), Infallible> {
    area.into_styled(PrimitiveStyle::with_fill(color.into()))
        .draw(target)
}

fn icon(target: &mut Bitmap, name: &str, icons: &dyn IconLibrary) -> Result<(), Infallible> {
    match icons.icon(name) {
        Some(icon) => {
            *target = icon.scaled(target.width(), target.height());
            Ok(())
        }
        None => {
            trace!("Icon {} not found", name);
            let area = target.bounding_box();
            label(target, name, UNLIT_TEXT, area)
        }
    }
}

fn font_for(text: &str, area: Rectangle) -> &'static MonoFont<'static> {
    let columns = text.lines().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
    let rows = text.lines().count().max(1) as u32;
    let large = &FONT_10X20;
    if columns * large.character_size.width <= area.size.width
        && rows * large.character_size.height <= area.size.height
    {
        large
    } else {
        &FONT_6X10
    }
}

/// Centered, possibly multi-line text
fn label(target: &mut Bitmap, text: &str, color: Color, area: Rectangle) -> Result<(), Infallible> {
    if text.is_empty() {
        return Ok(());
    }
    let font = font_for(text, area);
    let style = MonoTextStyle::new(font, Rgb888::from(color));
    let text_style = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build();
    let rows = text.lines().count().max(1) as i32;
    let line_height = font.character_size.height as i32;
    let center = area.center();
    let first = center.y - (rows - 1) * line_height / 2;
    for (i, line) in text.lines().enumerate() {
        let position = Point::new(center.x, first + i as i32 * line_height);
        Text::with_text_style(line, position, style, text_style).draw(target)?;
    }
    Ok(())
}

fn annunciator_part(target: &mut Bitmap, part: &PartFace, area: Rectangle) -> Result<(), Infallible> {
    let text_color = if part.lit { part.color } else { UNLIT_TEXT };
    match part.led {
        LedMark::None => {
            fill(target, area, part.color)?;
            let text_color = if part.lit { part.color.contrast() } else { UNLIT_TEXT };
            label(target, &part.text, text_color, area)?;
        }
        LedMark::Bar => {
            fill(target, area, Color::BLACK)?;
            let bar_height = (area.size.height / 6).max(2);
            let text_area = Rectangle::new(
                area.top_left,
                Size::new(area.size.width, area.size.height - bar_height),
            );
            label(target, &part.text, text_color, text_area)?;
            let inset = area.size.width / 6;
            Rectangle::new(
                area.top_left + Point::new(inset as i32, (area.size.height - bar_height * 2) as i32),
                Size::new(area.size.width - inset * 2, bar_height),
            )
            .into_styled(PrimitiveStyle::with_fill(part.color.into()))
            .draw(target)?;
        }
        LedMark::Dot => {
            fill(target, area, Color::BLACK)?;
            let diameter = (area.size.height / 4).max(3);
            let dot_area = Rectangle::new(area.top_left, Size::new(area.size.width, diameter * 2));
            Circle::with_center(dot_area.center(), diameter)
                .into_styled(PrimitiveStyle::with_fill(part.color.into()))
                .draw(target)?;
            let text_area = Rectangle::new(
                area.top_left + Point::new(0, (diameter * 2) as i32),
                Size::new(area.size.width, area.size.height.saturating_sub(diameter * 2)),
            );
            label(target, &part.text, text_color, text_area)?;
        }
    }
    Ok(())
}

fn led(target: &mut Bitmap, color: Color) -> Result<(), Infallible> {
    let area = target.bounding_box();
    let diameter = area.size.width.min(area.size.height) * 2 / 3;
    let style = PrimitiveStyleBuilder::new()
        .fill_color(color.into())
        .stroke_color(UNLIT_TEXT.into())
        .stroke_width(2)
        .build();
    Circle::with_center(area.center(), diameter)
        .into_styled(style)
        .draw(target)
}

fn gauge(target: &mut Bitmap, permille: u32, color: Color, text: &str) -> Result<(), Infallible> {
    let area = target.bounding_box();
    let (width, height) = (area.size.width, area.size.height);
    let margin = (width / 10).max(1);
    let bar_height = (height / 4).max(2);
    let frame = Rectangle::new(
        Point::new(margin as i32, (height - bar_height - margin) as i32),
        Size::new(width.saturating_sub(margin * 2), bar_height),
    );
    frame
        .into_styled(PrimitiveStyle::with_stroke(color.into(), 1))
        .draw(target)?;
    let inner = frame.size.width.saturating_sub(2) * permille / 1000;
    if inner > 0 {
        Rectangle::new(
            frame.top_left + Point::new(1, 1),
            Size::new(inner, bar_height.saturating_sub(2)),
        )
        .into_styled(PrimitiveStyle::with_fill(color.into()))
        .draw(target)?;
    }
    let text_area = Rectangle::new(
        Point::zero(),
        Size::new(width, height.saturating_sub(bar_height + margin)),
    );
    label(target, text, Color::WHITE, text_area)
}

fn chart(target: &mut Bitmap, series: &[SeriesFace]) -> Result<(), Infallible> {
    let width = target.width();
    for s in series {
        if s.points.len() < 2 {
            continue;
        }
        let step = width.saturating_sub(1) as f64 / (s.points.len() - 1) as f64;
        let style = PrimitiveStyle::with_stroke(s.color.into(), 1);
        for (i, pair) in s.points.windows(2).enumerate() {
            let start = Point::new((i as f64 * step).round() as i32, pair[0] as i32);
            let end = Point::new(((i + 1) as f64 * step).round() as i32, pair[1] as i32);
            Line::new(start, end).into_styled(style).draw(target)?;
        }
    }
    Ok(())
}

/// Diagonal hatching over the whole face
fn cover(target: &mut Bitmap) -> Result<(), Infallible> {
    let (width, height) = (target.width() as i32, target.height() as i32);
    let style = PrimitiveStyle::with_stroke(Color::GUARD.into(), 3);
    let mut x = -height;
    while x < width {
        Line::new(Point::new(x, 0), Point::new(x + height, height))
            .into_styled(style)
            .draw(target)?;
        x += 12;
    }
    Ok(())
}
