//! Planar (homography) transformations and their incremental updates.
//!
//! A [`PlanarTransformation`] maps template coordinates into image coordinates.
//! Points are re-centred on `center_offset` before the homography is applied,
//! so the same homography can be used at every pyramid level by rescaling the
//! translation and perspective terms.

use std::fmt;
use std::str::FromStr;

use log::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::array::{aliased, Array2, ImageU8};
use crate::error::{Result, TrackerError};
use crate::geometry::{Corner, Point, Quadrilateral, Rectangle};
use crate::grid::linspace;
use crate::histogram::IntegerCounts;
use crate::homography::{estimate_homography, mat3_inverse, mat3_mul, normalize, Mat3, IDENTITY};
use crate::homography::MIN_PROJECTIVE_NORMALIZATION;
use crate::interp::{bilinear, interp2};
use crate::serialize::{SerializedReader, SerializedWriter, DESCRIPTION_STRING_LENGTH};
use crate::verify::{VerifyAccumulator, VerifyResult};

/// Transform family. Ordered: `Translation < Affine < Projective`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum TransformType {
    Translation,
    Affine,
    Projective,
}

impl TransformType {
    /// Wire code; the upper byte is the number of parameters.
    pub const fn code(self) -> i32 {
        match self {
            TransformType::Translation => 0x0200,
            TransformType::Affine => 0x0600,
            TransformType::Projective => 0x0800,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0x0200 => Ok(TransformType::Translation),
            0x0600 => Ok(TransformType::Affine),
            0x0800 => Ok(TransformType::Projective),
            _ => Err(TrackerError::param(format!("unknown transform type 0x{code:04x}"))),
        }
    }

    pub const fn num_params(self) -> usize {
        (self.code() >> 8) as usize
    }

    /// True if a transform of this family may be updated with `update` increments.
    pub fn can_update_with(self, update: TransformType) -> bool {
        update <= self
    }
}

impl fmt::Display for TransformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformType::Translation => "translation",
            TransformType::Affine => "affine",
            TransformType::Projective => "projective",
        };
        f.write_str(name)
    }
}

impl FromStr for TransformType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "translation" => Ok(TransformType::Translation),
            "affine" => Ok(TransformType::Affine),
            "projective" => Ok(TransformType::Projective),
            other => Err(TrackerError::param(format!("unknown transform type '{other}'"))),
        }
    }
}

/// The template area compared by the `verify_transformation_*` methods.
///
/// Template pixel `(roi.left + i, roi.top + j)` is compared at template
/// coordinate `(roi.left + i - region_width/2, roi.top + j - region_height/2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyRegion {
    pub roi: Rectangle<f32>,
    pub region_width: f32,
    pub region_height: f32,
    /// Visit every `coordinate_increment`-th row and column.
    pub coordinate_increment: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanarTransformation {
    is_valid: bool,
    transform_type: TransformType,
    homography: Mat3,
    initial_corners: Quadrilateral<f32>,
    center_offset: Point<f32>,
    initial_points_are_zero_centered: bool,
}

const SERIALIZED_TYPE_NAME: &str = "PlanarTransformation";

impl PlanarTransformation {
    /// Identity transformation re-centred on `center_offset`.
    pub fn new(
        transform_type: TransformType,
        initial_corners: Quadrilateral<f32>,
        center_offset: Point<f32>,
    ) -> Self {
        Self {
            is_valid: true,
            transform_type,
            homography: IDENTITY,
            initial_corners,
            center_offset,
            initial_points_are_zero_centered: false,
        }
    }

    /// Identity transformation centred on the quad's centre.
    pub fn from_quad(transform_type: TransformType, quad: Quadrilateral<f32>) -> Self {
        Self::new(transform_type, quad, quad.compute_center())
    }

    pub fn with_homography(mut self, homography: Mat3) -> Self {
        self.homography = homography;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn transform_type(&self) -> TransformType {
        self.transform_type
    }

    pub fn set_transform_type(&mut self, transform_type: TransformType) {
        self.transform_type = transform_type;
    }

    pub fn homography(&self) -> &Mat3 {
        &self.homography
    }

    pub fn set_homography(&mut self, homography: Mat3) {
        self.homography = homography;
    }

    pub fn initial_corners(&self) -> &Quadrilateral<f32> {
        &self.initial_corners
    }

    pub fn set_initial_corners(&mut self, corners: Quadrilateral<f32>) {
        self.initial_corners = corners;
    }

    pub fn initial_points_are_zero_centered(&self) -> bool {
        self.initial_points_are_zero_centered
    }

    pub fn set_initial_points_are_zero_centered(&mut self, centered: bool) {
        self.initial_points_are_zero_centered = centered;
    }

    /// Centre offset expressed at a resolution `scale` times coarser.
    pub fn center_offset(&self, scale: f32) -> Point<f32> {
        if (scale - 1.0).abs() < f32::EPSILON {
            self.center_offset
        } else {
            Point::new(self.center_offset.x / scale, self.center_offset.y / scale)
        }
    }

    pub fn set_center_offset(&mut self, center_offset: Point<f32>) {
        self.center_offset = center_offset;
    }

    /// Copy another transformation's state into this one.
    pub fn set(&mut self, other: &PlanarTransformation) {
        self.transform_type = other.transform_type;
        self.homography = other.homography;
        self.center_offset = other.center_offset;
        self.initial_corners = other.initial_corners;
        self.initial_points_are_zero_centered = other.initial_points_are_zero_centered;
    }

    /// Compose a solved parameter increment into the homography.
    ///
    /// Translation increments are subtracted directly (scaled by `scale`).
    /// Affine and projective increments build `U = I + ΔH` and set
    /// `H = H · U⁻¹`, renormalizing so that `H[2][2] == 1`.
    pub fn update(&mut self, update: &[f32], scale: f32, update_type: TransformType) -> Result<()> {
        if !self.transform_type.can_update_with(update_type) {
            return Err(TrackerError::param(format!(
                "cannot update a {} transform with a {update_type} update",
                self.transform_type
            )));
        }
        if update.len() != update_type.num_params() {
            return Err(TrackerError::size(format!(
                "{update_type} update needs {} parameters, got {}",
                update_type.num_params(),
                update.len()
            )));
        }

        let p = update;
        let u: Mat3 = match update_type {
            TransformType::Translation => {
                self.homography[0][2] -= scale * p[0];
                self.homography[1][2] -= scale * p[1];
                return Ok(());
            }
            TransformType::Affine => [
                [1.0 + p[0], p[1], p[2] * scale],
                [p[3], 1.0 + p[4], p[5] * scale],
                [0.0, 0.0, 1.0],
            ],
            TransformType::Projective => [
                [1.0 + p[0], p[1], p[2] * scale],
                [p[3], 1.0 + p[4], p[5] * scale],
                [p[6] / scale, p[7] / scale, 1.0],
            ],
        };

        let u_inv = mat3_inverse(&u)
            .ok_or_else(|| TrackerError::param("update matrix is not invertible"))?;
        let mut h = mat3_mul(&self.homography, &u_inv);
        if (h[2][2] - 1.0).abs() > f32::EPSILON {
            h = normalize(&h);
        }
        self.homography = h;
        Ok(())
    }

    /// Apply this transformation to a set of points.
    ///
    /// See [`transform_points_static`].
    #[allow(clippy::too_many_arguments)]
    pub fn transform_points(
        &self,
        x_in: &[f32],
        y_in: &[f32],
        scale: f32,
        input_points_are_zero_centered: bool,
        output_points_are_zero_centered: bool,
        x_out: &mut [f32],
        y_out: &mut [f32],
    ) -> Result<()> {
        transform_points_static(
            x_in,
            y_in,
            scale,
            self.center_offset,
            self.transform_type,
            &self.homography,
            input_points_are_zero_centered,
            output_points_are_zero_centered,
            x_out,
            y_out,
        )
    }

    /// Forward-map a quad. Input corners are zero-centred iff the initial
    /// points were; output corners are in image coordinates.
    pub fn transform_quad(&self, quad: &Quadrilateral<f32>, scale: f32) -> Quadrilateral<f32> {
        self.map_quad(quad, scale, self.initial_points_are_zero_centered)
    }

    /// Forward-map a zero-centred quad, e.g. a fixed reference quad used to
    /// measure how far the homography moved between iterations.
    pub(crate) fn transform_centered_quad(
        &self,
        quad: &Quadrilateral<f32>,
        scale: f32,
    ) -> Quadrilateral<f32> {
        self.map_quad(quad, scale, true)
    }

    fn map_quad(&self, quad: &Quadrilateral<f32>, scale: f32, zero_centered: bool) -> Quadrilateral<f32> {
        let x_in = quad.corners.map(|p| p.x);
        let y_in = quad.corners.map(|p| p.y);
        let mut x_out = [0.0f32; 4];
        let mut y_out = [0.0f32; 4];
        transform_points_unchecked(
            &x_in,
            &y_in,
            scale,
            self.center_offset,
            self.transform_type,
            &self.homography,
            zero_centered,
            false,
            &mut x_out,
            &mut y_out,
        );
        Quadrilateral::new(
            Point::new(x_out[0], y_out[0]),
            Point::new(x_out[1], y_out[1]),
            Point::new(x_out[2], y_out[2]),
            Point::new(x_out[3], y_out[3]),
        )
    }

    /// The initial corners mapped through the current homography.
    pub fn transformed_corners(&self) -> Quadrilateral<f32> {
        self.transform_quad(&self.initial_corners, 1.0)
    }

    /// Angle (radians) from the transformed quad's centre to the midpoint of its right edge.
    pub fn transformed_orientation(&self) -> f32 {
        let q = self.transformed_corners();
        let center = q.compute_center();
        let tr = q[Corner::TopRight];
        let br = q[Corner::BottomRight];
        let mid = Point::new((tr.x + br.x) / 2.0, (tr.y + br.y) / 2.0);
        (mid.y - center.y).atan2(mid.x - center.x)
    }

    /// Warp `input` into `output` by inverse-mapping every output pixel.
    ///
    /// Pixels that map outside `input` are set to 0.
    pub fn transform_image(&self, input: &ImageU8, output: &mut ImageU8, scale: f32) -> Result<()> {
        if !input.same_size(output) {
            return Err(TrackerError::size("input and output are different sizes"));
        }
        if aliased(input, output) {
            return Err(TrackerError::AliasedBuffers);
        }

        let inverse = mat3_inverse(&self.homography)
            .ok_or_else(|| TrackerError::param("homography is not invertible"))?;
        let inverse = normalize(&inverse);

        let (w, h) = (input.width, input.height);
        let x_in = Array2::from_fn(w, h, |x, _| x as f32);
        let y_in = Array2::from_fn(w, h, |_, y| y as f32);
        let mut x_t = Array2::<f32>::new(w, h);
        let mut y_t = Array2::<f32>::new(w, h);

        transform_points_static(
            &x_in.buf,
            &y_in.buf,
            scale,
            self.center_offset,
            self.transform_type,
            &inverse,
            false,
            false,
            &mut x_t.buf,
            &mut y_t.buf,
        )?;

        interp2(input, &x_t, &y_t, output, 0u8)
    }

    /// Forward-map integer points, rounding the results.
    pub fn transform_point_list(&self, points: &[Point<i16>], scale: f32) -> Vec<Point<i16>> {
        let x_in: Vec<f32> = points.iter().map(|p| p.x as f32).collect();
        let y_in: Vec<f32> = points.iter().map(|p| p.y as f32).collect();
        let mut x_out = vec![0.0f32; points.len()];
        let mut y_out = vec![0.0f32; points.len()];
        transform_points_unchecked(
            &x_in,
            &y_in,
            scale,
            self.center_offset,
            self.transform_type,
            &self.homography,
            false,
            false,
            &mut x_out,
            &mut y_out,
        );
        x_out
            .iter()
            .zip(&y_out)
            .map(|(&x, &y)| Point::new(x.round() as i16, y.round() as i16))
            .collect()
    }

    /// Size in bytes of a serialized transformation.
    pub const fn serialization_size() -> usize {
        512 + 16 * DESCRIPTION_STRING_LENGTH
    }

    /// Snapshot into a fixed-size buffer of [`Self::serialization_size`] bytes.
    pub fn serialize(&self, object_name: &str) -> Result<Vec<u8>> {
        let mut w = SerializedWriter::new(Self::serialization_size());
        w.description(SERIALIZED_TYPE_NAME, object_name)?;
        w.bool("isValid", self.is_valid)?;
        w.i32("transformType", self.transform_type.code())?;
        let flat: Vec<f32> = self.homography.iter().flatten().copied().collect();
        w.f32_array("homography", 3, 3, &flat)?;
        let corners: Vec<f32> = self.initial_corners.corners.iter().flat_map(|p| [p.x, p.y]).collect();
        w.f32_group("Quadrilateral<f32>", "initialCorners", &corners)?;
        w.f32_group("Point<f32>", "centerOffset", &[self.center_offset.x, self.center_offset.y])?;
        w.bool("initialPointsAreZeroCentered", self.initial_points_are_zero_centered)?;
        Ok(w.finish())
    }

    /// Restore a snapshot written by [`Self::serialize`]; returns the object name too.
    pub fn deserialize(buf: &[u8]) -> Result<(String, PlanarTransformation)> {
        let mut r = SerializedReader::new(buf);
        let object_name = r.description(SERIALIZED_TYPE_NAME)?;
        let is_valid = r.bool()?;
        let transform_type = TransformType::from_code(r.i32()?)
            .map_err(|e| TrackerError::Deserialize(e.to_string()))?;
        let (height, width, values) = r.f32_array()?;
        if height != 3 || width != 3 {
            return Err(TrackerError::Deserialize(format!(
                "homography must be 3x3, found {height}x{width}"
            )));
        }
        let mut homography = [[0.0f32; 3]; 3];
        for (i, v) in values.iter().enumerate() {
            homography[i / 3][i % 3] = *v;
        }
        let c = r.f32_group::<8>("Quadrilateral<f32>")?;
        let initial_corners = Quadrilateral::new(
            Point::new(c[0], c[1]),
            Point::new(c[2], c[3]),
            Point::new(c[4], c[5]),
            Point::new(c[6], c[7]),
        );
        let o = r.f32_group::<2>("Point<f32>")?;
        let initial_points_are_zero_centered = r.bool()?;

        Ok((
            object_name,
            PlanarTransformation {
                is_valid,
                transform_type,
                homography,
                initial_corners,
                center_offset: Point::new(o[0], o[1]),
                initial_points_are_zero_centered,
            },
        ))
    }

    /// Compare a template region against `next_image` by bilinear sampling
    /// under the current homography.
    ///
    /// A sample counts as in bounds when both `floor` and `floor + 1` of its
    /// mapped coordinates lie inside the image.
    pub fn verify_transformation_projective_linear_interpolate(
        &self,
        template_image: &ImageU8,
        region: &VerifyRegion,
        next_image: &ImageU8,
        max_pixel_difference: u8,
    ) -> Result<VerifyResult> {
        let walk = VerifyWalk::new(self, template_image, region, next_image)?;
        let x_max = next_image.width as f32 - 1.0;
        let y_max = next_image.height as f32 - 1.0;
        let mut acc = VerifyAccumulator::new(max_pixel_difference);

        walk.for_each(|template_value, x, y| {
            let x0 = x.floor();
            let y0 = y.floor();
            if !(x0 >= 0.0 && x0 + 1.0 <= x_max && y0 >= 0.0 && y0 + 1.0 <= y_max) {
                return;
            }
            let observed = bilinear(next_image, x, y).round() as i32;
            acc.add(observed, template_value as i32);
        });
        Ok(acc.finish())
    }

    /// Compare a template region against `next_image` at the nearest pixel,
    /// after scaling both images so their 95th-percentile grayvalue maps to 255.
    pub fn verify_transformation_projective_nearest_neighbor(
        &self,
        template_image: &ImageU8,
        template_counts: &IntegerCounts,
        region: &VerifyRegion,
        next_image: &ImageU8,
        next_counts: &IntegerCounts,
        max_pixel_difference: u8,
    ) -> Result<VerifyResult> {
        const FRACTIONAL_BITS: u32 = 14;
        const HIGH_PERCENTILE: f32 = 0.95;

        let walk = VerifyWalk::new(self, template_image, region, next_image)?;
        let divisor = |counts: &IntegerCounts| {
            let high = counts.compute_percentile(HIGH_PERCENTILE).max(1);
            255 * ((1u32 << FRACTIONAL_BITS) as f32 / high as f32).round() as i32
        };
        let template_divisor = divisor(template_counts);
        let next_divisor = divisor(next_counts);

        let mut acc = VerifyAccumulator::new(max_pixel_difference);
        walk.for_each(|template_value, x, y| {
            let xi = x.round();
            let yi = y.round();
            if !(xi >= 0.0
                && xi <= next_image.width as f32 - 1.0
                && yi >= 0.0
                && yi <= next_image.height as f32 - 1.0)
            {
                return;
            }
            let observed = next_image.get(xi as u32, yi as u32) as i32;
            let observed = (observed * next_divisor) >> FRACTIONAL_BITS;
            let expected = (template_value as i32 * template_divisor) >> FRACTIONAL_BITS;
            acc.add(observed, expected);
        });
        Ok(acc.finish())
    }
}

/// Shared traversal of a [`VerifyRegion`]: yields each visited template pixel
/// with its image coordinates under the current homography.
struct VerifyWalk<'a> {
    template_image: &'a ImageU8,
    region: &'a VerifyRegion,
    homography: Mat3,
    center: Point<f32>,
    min_x: f32,
    min_y: f32,
    num_x: usize,
    num_y: usize,
}

impl<'a> VerifyWalk<'a> {
    fn new(
        transformation: &PlanarTransformation,
        template_image: &'a ImageU8,
        region: &'a VerifyRegion,
        next_image: &ImageU8,
    ) -> Result<Self> {
        if !template_image.same_size(next_image) {
            return Err(TrackerError::size("input images must be the same size"));
        }
        if region.coordinate_increment == 0 {
            return Err(TrackerError::param("coordinate increment must be positive"));
        }

        let roi = &region.roi;
        let min_x = roi.left - region.region_width / 2.0;
        let max_x = roi.right - region.region_width / 2.0;
        let min_y = roi.top - region.region_height / 2.0;
        let max_y = roi.bottom - region.region_height / 2.0;
        let num_x = (max_x - min_x + 1.0).floor().max(0.0) as usize;
        let num_y = (max_y - min_y + 1.0).floor().max(0.0) as usize;

        let left = roi.left.round();
        let top = roi.top.round();
        if left < 0.0
            || top < 0.0
            || left as usize + num_x > template_image.width as usize
            || top as usize + num_y > template_image.height as usize
        {
            return Err(TrackerError::param(
                "template region of interest extends outside the template image",
            ));
        }

        let initial_image_scale = (template_image.width / next_image.width) as f32;
        let h = transformation.homography;
        let homography = [
            [h[0][0], h[0][1], h[0][2] / initial_image_scale],
            [h[1][0], h[1][1], h[1][2] / initial_image_scale],
            [h[2][0] * initial_image_scale, h[2][1] * initial_image_scale, h[2][2]],
        ];

        Ok(Self {
            template_image,
            region,
            homography,
            center: transformation.center_offset(initial_image_scale),
            min_x,
            min_y,
            num_x,
            num_y,
        })
    }

    fn for_each(&self, mut f: impl FnMut(u8, f32, f32)) {
        let h = &self.homography;
        let step = self.region.coordinate_increment;
        let xs = linspace(self.min_x, self.min_x + self.num_x as f32 - 1.0, self.num_x);
        let ys = linspace(self.min_y, self.min_y + self.num_y as f32 - 1.0, self.num_y);
        let left = self.region.roi.left.round() as u32;
        let top = self.region.roi.top.round() as u32;

        for iy in (0..self.num_y).step_by(step) {
            let y_original = ys.get(iy);
            for ix in (0..self.num_x).step_by(step) {
                let x_original = xs.get(ix);
                let n = h[2][0] * x_original + h[2][1] * y_original + h[2][2];
                if n.abs() < MIN_PROJECTIVE_NORMALIZATION {
                    continue;
                }
                let x = (h[0][0] * x_original + h[0][1] * y_original + h[0][2]) / n + self.center.x;
                let y = (h[1][0] * x_original + h[1][1] * y_original + h[1][2]) / n + self.center.y;
                let template_value = self.template_image.get(left + ix as u32, top + iy as u32);
                f(template_value, x, y);
            }
        }
    }
}

/// Apply `homography` (of family `transform_type`) to a set of points.
///
/// Inputs are first multiplied by `scale` and, unless zero-centred, shifted by
/// `-center_offset`; outputs are shifted by `+center_offset` unless zero-centred,
/// then divided by `scale`. Points whose projective normalization vanishes come
/// out as NaN.
#[allow(clippy::too_many_arguments)]
pub fn transform_points_static(
    x_in: &[f32],
    y_in: &[f32],
    scale: f32,
    center_offset: Point<f32>,
    transform_type: TransformType,
    homography: &Mat3,
    input_points_are_zero_centered: bool,
    output_points_are_zero_centered: bool,
    x_out: &mut [f32],
    y_out: &mut [f32],
) -> Result<()> {
    let n = x_in.len();
    if y_in.len() != n || x_out.len() != n || y_out.len() != n {
        return Err(TrackerError::size("all inputs and outputs must be the same size"));
    }
    transform_points_unchecked(
        x_in,
        y_in,
        scale,
        center_offset,
        transform_type,
        homography,
        input_points_are_zero_centered,
        output_points_are_zero_centered,
        x_out,
        y_out,
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn transform_points_unchecked(
    x_in: &[f32],
    y_in: &[f32],
    scale: f32,
    center_offset: Point<f32>,
    transform_type: TransformType,
    h: &Mat3,
    input_points_are_zero_centered: bool,
    output_points_are_zero_centered: bool,
    x_out: &mut [f32],
    y_out: &mut [f32],
) {
    let zero = Point::new(0.0, 0.0);
    let cin = if input_points_are_zero_centered { zero } else { center_offset };
    let cout = if output_points_are_zero_centered { zero } else { center_offset };

    match transform_type {
        TransformType::Translation => {
            let dx = (h[0][2] - cin.x + cout.x) / scale;
            let dy = (h[1][2] - cin.y + cout.y) / scale;
            for i in 0..x_in.len() {
                x_out[i] = x_in[i] + dx;
                y_out[i] = y_in[i] + dy;
            }
        }
        TransformType::Affine => {
            for i in 0..x_in.len() {
                let xc = x_in[i] * scale - cin.x;
                let yc = y_in[i] * scale - cin.y;
                let xp = h[0][0] * xc + h[0][1] * yc + h[0][2];
                let yp = h[1][0] * xc + h[1][1] * yc + h[1][2];
                x_out[i] = (xp + cout.x) / scale;
                y_out[i] = (yp + cout.y) / scale;
            }
        }
        TransformType::Projective => {
            for i in 0..x_in.len() {
                let xc = x_in[i] * scale - cin.x;
                let yc = y_in[i] * scale - cin.y;
                let norm = h[2][0] * xc + h[2][1] * yc + h[2][2];
                if norm.abs() < MIN_PROJECTIVE_NORMALIZATION {
                    x_out[i] = f32::NAN;
                    y_out[i] = f32::NAN;
                    continue;
                }
                let xp = (h[0][0] * xc + h[0][1] * yc + h[0][2]) / norm;
                let yp = (h[1][0] * xc + h[1][1] * yc + h[1][2]) / norm;
                x_out[i] = (xp + cout.x) / scale;
                y_out[i] = (yp + cout.y) / scale;
            }
        }
    }
}

/// Homography taking the unit square `(0,0), (0,1), (1,0), (1,1)` onto `quad`.
///
/// Returns the homography and a numerical-failure flag.
pub fn compute_homography_from_quad(quad: &Quadrilateral<f32>) -> (Mat3, bool) {
    let unit = Quadrilateral::new(
        Point::new(0.0, 0.0),
        Point::new(0.0, 1.0),
        Point::new(1.0, 0.0),
        Point::new(1.0, 1.0),
    );
    compute_homography_from_quads(&unit, quad)
}

/// Homography taking `original` onto `transformed`, corner by corner.
///
/// Non-convex or degenerate quads produce the identity and a set
/// numerical-failure flag.
pub fn compute_homography_from_quads(
    original: &Quadrilateral<f32>,
    transformed: &Quadrilateral<f32>,
) -> (Mat3, bool) {
    if !original.is_convex() || !transformed.is_convex() {
        warn!("Quad is not convex");
        return (IDENTITY, true);
    }
    match estimate_homography(&original.corners, &transformed.corners) {
        Some(h) => (h, false),
        None => (IDENTITY, true),
    }
}
