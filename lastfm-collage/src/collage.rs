//! Collage composition: caption overlays, tile compositing, grid placement.

use std::borrow::Cow;

use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};

use crate::models::Album;

/// Edge length of one collage cell, in px.
pub const CELL_EDGE: u32 = 300;
/// Cells per collage row and per collage column.
pub const GRID_DIM: u32 = 3;

const FONT_SIZE_PX: f32 = 15.0;
const CAPTION_BG_BOTTOM_PADDING: f64 = 5.0;
const CAPTION_BG_ALPHA: u8 = 180;

/// RGBA8 brush color carried through Parley text styling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BrushRgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

const CAPTION_TEXT_BRUSH: BrushRgba8 = BrushRgba8 {
    r: 255,
    g: 255,
    b: 255,
    a: 255,
};

/// Compose up to nine albums into a 900×900 RGB collage.
///
/// Albums pair with grid cells in placement order; when fewer than nine
/// are supplied the remaining cells keep the canvas's initial blank state,
/// and anything beyond nine is never pulled from the iterator. With
/// `print_progress` set, one stdout line is emitted per processed album.
pub fn generate_collage(
    albums: impl IntoIterator<Item = Album>,
    font_bytes: &[u8],
    print_progress: bool,
) -> Result<RgbImage> {
    let mut captions = CaptionRenderer::new(font_bytes)?;
    let mut canvas = RgbaImage::new(GRID_DIM * CELL_EDGE, GRID_DIM * CELL_EDGE);

    if print_progress {
        println!("\nGenerating Last.fm collage:");
    }

    for ((x, y), album) in grid_origins().zip(albums) {
        if print_progress {
            println!("  ✔ Fetched \"{}\" by {}", album.title, album.artist);
        }

        let label = format!("{}\n{}", album.title, album.artist);
        let tile = compose_tile(&mut captions, album.cover_art, &label)?;
        imageops::replace(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

/// Cell origins in placement order: the cartesian product of column × row
/// over {0,1,2}², column in the outer loop, scaled by the cell edge.
fn grid_origins() -> impl Iterator<Item = (u32, u32)> {
    (0..GRID_DIM).flat_map(|col| (0..GRID_DIM).map(move |row| (col * CELL_EDGE, row * CELL_EDGE)))
}

fn compose_tile(
    captions: &mut CaptionRenderer,
    cover: RgbaImage,
    label: &str,
) -> Result<RgbaImage> {
    let mut tile = if cover.dimensions() == (CELL_EDGE, CELL_EDGE) {
        cover
    } else {
        imageops::resize(&cover, CELL_EDGE, CELL_EDGE, FilterType::CatmullRom)
    };

    let caption = captions.overlay(label);
    over_in_place(&mut tile, caption.data_as_u8_slice())?;
    Ok(tile)
}

/// Builds per-cell caption layers from one registered font.
struct CaptionRenderer {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<BrushRgba8>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl CaptionRenderer {
    fn new(font_bytes: &[u8]) -> Result<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.to_vec()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| anyhow!("No font families found in the supplied font file"))?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| anyhow!("Registered font family has no name"))?
            .to_string();

        let font =
            vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(font_bytes.to_vec()), 0);

        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font,
        })
    }

    /// A cell-sized transparent layer with the caption text drawn on a
    /// semi-transparent black strip across the cell's top edge. The strip
    /// spans the full cell width and is as tall as the laid-out text plus
    /// a small bottom padding.
    fn overlay(&mut self, text: &str) -> vello_cpu::Pixmap {
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(FONT_SIZE_PX));
        builder.push_default(parley::style::StyleProperty::Brush(CAPTION_TEXT_BRUSH));

        let mut layout: parley::Layout<BrushRgba8> = builder.build(text);
        layout.break_all_lines(None);

        let mut text_height = 0.0f64;
        for line in layout.lines() {
            let m = line.metrics();
            text_height += f64::from(m.ascent + m.descent + m.leading);
        }
        let strip_height =
            (text_height.ceil() + CAPTION_BG_BOTTOM_PADDING).min(f64::from(CELL_EDGE));

        let edge = CELL_EDGE as u16;
        let mut ctx = vello_cpu::RenderContext::new(edge, edge);

        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(0, 0, 0, CAPTION_BG_ALPHA));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(CELL_EDGE),
            strip_height,
        ));

        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };

                let brush = run.style().brush;
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    brush.r, brush.g, brush.b, brush.a,
                ));

                let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(&self.font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }

        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(edge, edge);
        ctx.render_to_pixmap(&mut pixmap);
        pixmap
    }
}

type PremulRgba8 = [u8; 4];

/// Source-over blend of one premultiplied RGBA8 pixel.
fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    if src[3] == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(u16::from(dst[i]), inv));
    }
    out
}

fn over_in_place(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(anyhow!("over_in_place expects equal-length rgba8 buffers"));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
