use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use lktrack::{
    DenseTracker, ImageU8, Point, Quadrilateral, SampledProjectiveTracker, SlowConfig, SlowParams,
    SlowTracker, TrackerConfig, TransformType, UpdateParams, VerifyResult,
};

/// Track a planar template through a sequence of PNG/JPEG frames
#[derive(Parser)]
#[command(name = "lktrack-track", version)]
struct Args {
    /// Frame the template is taken from
    #[arg(short, long)]
    template: String,

    /// Template corners as x0,y0,x1,y1,x2,y2,x3,y3 (top-left, top-right,
    /// bottom-left, bottom-right)
    #[arg(short, long)]
    quad: String,

    /// Frames to track into, in order
    #[arg(required = true)]
    frames: Vec<String>,

    /// Tracker variant
    #[arg(long, value_enum, default_value = "dense")]
    tracker: TrackerChoice,

    /// Transform family: translation, affine or projective
    #[arg(long, default_value = "affine")]
    transform: TransformType,

    /// Pyramid levels (1 to 5)
    #[arg(short, long)]
    levels: Option<usize>,

    /// TOML file with tracker settings; flags override it
    #[arg(short, long)]
    config: Option<String>,

    /// Sample budget at the base level (sampled tracker)
    #[arg(long)]
    max_samples: Option<usize>,

    /// Iterations per pyramid level
    #[arg(long, default_value = "50")]
    max_iterations: usize,

    /// Grayvalue difference counted as similar during verification
    #[arg(long, default_value = "30")]
    max_pixel_difference: u8,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Suppress log output on stderr
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TrackerChoice {
    Dense,
    Sampled,
    Slow,
}

#[derive(Serialize)]
struct FrameResult {
    file: String,
    converged: bool,
    corners: [[f32; 2]; 4],
    homography: [[f32; 3]; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    verification: Option<Verification>,
}

#[derive(Serialize)]
struct Verification {
    mean_absolute_difference: i32,
    num_in_bounds: i32,
    num_similar_pixels: i32,
    similar_fraction: f32,
}

impl From<VerifyResult> for Verification {
    fn from(v: VerifyResult) -> Self {
        Self {
            mean_absolute_difference: v.mean_absolute_difference,
            num_in_bounds: v.num_in_bounds,
            num_similar_pixels: v.num_similar_pixels,
            similar_fraction: v.similar_fraction(),
        }
    }
}

enum Tracker {
    Dense(DenseTracker),
    Sampled(SampledProjectiveTracker),
    Slow(SlowTracker),
}

impl Tracker {
    fn track(&mut self, next: &ImageU8, params: &UpdateParams) -> Result<(bool, Option<VerifyResult>)> {
        Ok(match self {
            Tracker::Dense(t) => {
                let r = t.update_track(next, params)?;
                (r.converged, Some(r.verify))
            }
            Tracker::Sampled(t) => {
                let r = t.update_track(next, params)?;
                (r.converged, Some(r.verify))
            }
            Tracker::Slow(t) => {
                let params = SlowParams { update: *params, ..SlowParams::default() };
                (t.update_track(next, &params)?, None)
            }
        })
    }

    fn corners_and_homography(&self) -> (Quadrilateral<f32>, [[f32; 3]; 3]) {
        let transformation = match self {
            Tracker::Dense(t) => t.transformation(),
            Tracker::Sampled(t) => t.transformation(),
            Tracker::Slow(t) => t.transformation(),
        };
        (transformation.transformed_corners(), *transformation.homography())
    }
}

fn load_image(path: &str) -> Result<ImageU8> {
    let img = image::open(path)
        .with_context(|| format!("failed to open image: {path}"))?
        .into_luma8();

    let width = img.width();
    let height = img.height();
    let pixels = img.into_raw();

    Ok(ImageU8::from_buf(width, height, width, pixels)?)
}

fn parse_quad(s: &str) -> Result<Quadrilateral<f32>> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid quad: {s}"))?;
    if values.len() != 8 {
        bail!("--quad needs 8 comma-separated numbers, got {}", values.len());
    }
    let p = |i: usize| Point::new(values[2 * i], values[2 * i + 1]);
    Ok(Quadrilateral::new(p(0), p(1), p(2), p(3)))
}

fn tracker_config(args: &Args, width: u32, height: u32) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
            TrackerConfig::from_toml_str(&text).with_context(|| format!("invalid config: {path}"))?
        }
        None => TrackerConfig::default(),
    };
    config.base_image_width = width;
    config.base_image_height = height;
    config.transform_type = args.transform;
    if let Some(levels) = args.levels {
        config.num_pyramid_levels = levels;
    }
    if let Some(n) = args.max_samples {
        config.sampling.max_samples_at_base_level = n;
    }
    Ok(config)
}

fn build_tracker(args: &Args, template: &ImageU8, quad: Quadrilateral<f32>) -> Result<Tracker> {
    let config = tracker_config(args, template.width, template.height)?;
    Ok(match args.tracker {
        TrackerChoice::Dense => Tracker::Dense(DenseTracker::new(template, quad, config)?),
        TrackerChoice::Sampled => Tracker::Sampled(SampledProjectiveTracker::new(template, quad, config)?),
        TrackerChoice::Slow => {
            let slow = SlowConfig {
                transform_type: config.transform_type,
                num_pyramid_levels: config.num_pyramid_levels,
                base_image_width: config.base_image_width,
                base_image_height: config.base_image_height,
                scale_template_region_percent: config.scale_template_region_percent,
                ..SlowConfig::default()
            };
            Tracker::Slow(SlowTracker::new(template, quad, slow)?)
        }
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let quad = parse_quad(&args.quad)?;
    let template = load_image(&args.template)?;
    let mut tracker = build_tracker(&args, &template, quad)
        .with_context(|| format!("cannot seed tracker on {}", args.template))?;
    log::info!("seeded on {} ({}x{})", args.template, template.width, template.height);

    let params = UpdateParams {
        max_iterations: args.max_iterations,
        verify_max_pixel_difference: args.max_pixel_difference,
        ..UpdateParams::default()
    };

    for path in &args.frames {
        let frame = load_image(path)?;
        if (frame.width, frame.height) != (template.width, template.height) {
            bail!(
                "{path} is {}x{}, the template frame is {}x{}",
                frame.width,
                frame.height,
                template.width,
                template.height
            );
        }

        let (converged, verify) = tracker.track(&frame, &params).with_context(|| format!("tracking failed on {path}"))?;
        let (corners, homography) = tracker.corners_and_homography();
        if !converged {
            log::warn!("{path}: did not converge");
        }

        let result = FrameResult {
            file: path.clone(),
            converged,
            corners: corners.corners.map(|p| [p.x, p.y]),
            homography,
            verification: verify.map(Verification::from),
        };
        let json = if args.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{json}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quad_in_corner_order() {
        let q = parse_quad("10,20, 30,20, 10,40, 30,40").unwrap();
        assert_eq!(q.corners[1], Point::new(30.0, 20.0));
        assert_eq!(q.corners[2], Point::new(10.0, 40.0));
    }

    #[test]
    fn rejects_short_quad() {
        assert!(parse_quad("1,2,3,4").is_err());
        assert!(parse_quad("1,2,3,4,5,6,7,x").is_err());
    }
}
