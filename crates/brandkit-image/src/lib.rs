use brandkit_core::{Color, GeometryStrategy, LogoFit};
use image::imageops::{self, FilterType};
use image::{GenericImageView, Rgb, RgbImage, Rgba, Rgba32FImage, RgbaImage};

/// Bicubic (Catmull-Rom) resampling for every scale step.
pub const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of<I: GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    pub fn aspect(self) -> f64 {
        self.width.max(1) as f64 / self.height.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backdrop {
    Solid(Color),
    Transparent,
}

impl Backdrop {
    fn pixel(self) -> Rgba<u8> {
        match self {
            Self::Solid(color) => Rgba([color.r, color.g, color.b, 255]),
            Self::Transparent => Rgba([0, 0, 0, 0]),
        }
    }
}

/// Largest uniform scale that keeps `src` inside `target`. Zero-sized sources are
/// treated as 1px so the ratio is always finite.
pub fn contain_scale(src: ImageSize, target: ImageSize) -> f64 {
    let width = src.width.max(1) as f64;
    let height = src.height.max(1) as f64;
    (target.width as f64 / width).min(target.height as f64 / height)
}

/// Height when the source is wider than the frame, width otherwise.
pub fn height_preferred_scale(src: ImageSize, target: ImageSize) -> f64 {
    if src.aspect() > target.aspect() {
        target.height as f64 / src.height.max(1) as f64
    } else {
        target.width as f64 / src.width.max(1) as f64
    }
}

pub fn scaled_size(src: ImageSize, scale: f64) -> ImageSize {
    let axis = |len: u32| ((len.max(1) as f64 * scale).round() as u32).max(1);
    ImageSize::new(axis(src.width), axis(src.height))
}

/// `floor((target - scaled) / 2)` on both axes. Negative when the content
/// overflows, which clips it symmetrically (the extra pixel goes right/bottom).
pub fn centered_offset(target: u32, scaled: u32) -> i64 {
    (target as i64 - scaled as i64).div_euclid(2)
}

pub fn is_opaque(image: &RgbaImage) -> bool {
    image.pixels().all(|px| px[3] == u8::MAX)
}

/// Resamples in premultiplied space so transparent neighbours do not bleed dark
/// fringes into anti-aliased edges.
pub fn resize_rgba(source: &RgbaImage, size: ImageSize) -> RgbaImage {
    if ImageSize::of(source) == size {
        return source.clone();
    }
    if is_opaque(source) {
        return imageops::resize(source, size.width, size.height, RESAMPLE_FILTER);
    }

    let mut premultiplied = Rgba32FImage::new(source.width(), source.height());
    for (dst, px) in premultiplied.pixels_mut().zip(source.pixels()) {
        let alpha = px[3] as f32 / 255.0;
        *dst = Rgba([
            px[0] as f32 / 255.0 * alpha,
            px[1] as f32 / 255.0 * alpha,
            px[2] as f32 / 255.0 * alpha,
            alpha,
        ]);
    }
    let resized = imageops::resize(&premultiplied, size.width, size.height, RESAMPLE_FILTER);

    let mut out = RgbaImage::new(size.width, size.height);
    for (dst, px) in out.pixels_mut().zip(resized.pixels()) {
        let alpha = px[3].clamp(0.0, 1.0);
        let straight = |c: f32| if alpha > 0.0 { (c / alpha).clamp(0.0, 1.0) } else { 0.0 };
        *dst = Rgba([
            unit_to_u8(straight(px[0])),
            unit_to_u8(straight(px[1])),
            unit_to_u8(straight(px[2])),
            unit_to_u8(alpha),
        ]);
    }
    out
}

fn unit_to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Alpha-composites `content` centered on a fresh `target` canvas.
pub fn place_centered(content: &RgbaImage, target: ImageSize, backdrop: Backdrop) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(target.width, target.height, backdrop.pixel());
    let x = centered_offset(target.width, content.width());
    let y = centered_offset(target.height, content.height());
    imageops::overlay(&mut canvas, content, x, y);
    canvas
}

pub fn pad_to_fit(source: &RgbaImage, target: ImageSize, backdrop: Backdrop) -> RgbaImage {
    let src = ImageSize::of(source);
    let scaled = scaled_size(src, contain_scale(src, target));
    let bounded = ImageSize::new(scaled.width.min(target.width), scaled.height.min(target.height));
    place_centered(&resize_rgba(source, bounded), target, backdrop)
}

pub fn fit_exact(source: &RgbaImage, target: ImageSize, backdrop: Backdrop, fit: LogoFit) -> RgbaImage {
    match fit {
        LogoFit::Limiting => pad_to_fit(source, target, backdrop),
        LogoFit::Aspect => {
            let plan = AspectPlan::new(ImageSize::of(source), target);
            let (src_w, src_h) = source.dimensions();
            let x = src_w.saturating_sub(plan.window.width) / 2;
            let y = src_h.saturating_sub(plan.window.height) / 2;
            let window = imageops::crop_imm(source, x, y, plan.window.width, plan.window.height).to_image();
            let resampled = resize_rgba(&window, plan.resampled);
            let x = (plan.resampled.width - plan.visible.width) / 2;
            let y = (plan.resampled.height - plan.visible.height) / 2;
            let visible = imageops::crop_imm(&resampled, x, y, plan.visible.width, plan.visible.height).to_image();
            place_centered(&visible, target, backdrop)
        }
    }
}

/// Geometry of a height-preferred fit. Only `window` (the source region that
/// survives clipping, rounded outwards) is resampled, uniformly by `scale`, to
/// `resampled`; its center `visible` part lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectPlan {
    pub scale: f64,
    pub window: ImageSize,
    pub resampled: ImageSize,
    pub visible: ImageSize,
}

impl AspectPlan {
    pub fn new(src: ImageSize, target: ImageSize) -> Self {
        let src = ImageSize::new(src.width.max(1), src.height.max(1));
        let scale = height_preferred_scale(src, target);
        let scaled = scaled_size(src, scale);
        let visible = ImageSize::new(scaled.width.min(target.width), scaled.height.min(target.height));
        let cover = |shown: u32, len: u32| ((shown as f64 / scale - 1e-9).ceil() as u32).clamp(1, len);
        let window = ImageSize::new(cover(visible.width, src.width), cover(visible.height, src.height));
        let resampled = scaled_size(window, scale);
        Self {
            scale,
            window,
            resampled,
            visible: ImageSize::new(visible.width.min(resampled.width), visible.height.min(resampled.height)),
        }
    }
}

/// Centered square of side `min(w, h)` at native resolution.
pub fn center_square_crop(source: &RgbaImage) -> RgbaImage {
    let (width, height) = source.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(source, x, y, side, side).to_image()
}

pub fn compose(source: &RgbaImage, strategy: GeometryStrategy, target: ImageSize, backdrop: Backdrop) -> RgbaImage {
    match strategy {
        GeometryStrategy::PadFit | GeometryStrategy::PreCroppedSquare => pad_to_fit(source, target, backdrop),
        GeometryStrategy::FitExactByLongerAxis => fit_exact(source, target, backdrop, LogoFit::Limiting),
        GeometryStrategy::FitExactHeightPreferred => fit_exact(source, target, backdrop, LogoFit::Aspect),
    }
}

/// Composites over an opaque `fill` and drops the alpha channel.
pub fn flatten_onto(image: &RgbaImage, fill: Color) -> RgbImage {
    let [bg_r, bg_g, bg_b] = fill.channels().map(u16::from);
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, px) in out.pixels_mut().zip(image.pixels()) {
        let alpha = px[3] as u16;
        if alpha == 255 {
            *dst = Rgb([px[0], px[1], px[2]]);
            continue;
        }
        let inv = 255 - alpha;
        let mix = |fg: u8, bg: u16| (mul_div255(fg as u16, alpha) + mul_div255(bg, inv)).min(255) as u8;
        *dst = Rgb([mix(px[0], bg_r), mix(px[1], bg_g), mix(px[2], bg_b)]);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u16 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u16
}
