use crate::error::{PipelineError, PipelineResult};

/// Water depth per node: `elevation + bathymetry`, negative values clamped to zero.
pub fn compute_depth(elevation: &[f32], bathymetry: &[f32]) -> PipelineResult<Vec<f32>> {
    if elevation.len() != bathymetry.len() {
        return Err(PipelineError::ShapeMismatch {
            field: "elevation",
            expected: bathymetry.len(),
            actual: elevation.len(),
        });
    }

    Ok(elevation
        .iter()
        .zip(bathymetry)
        .map(|(&elev, &bathy)| clamp_nonnegative(elev + bathy))
        .collect())
}

/// Zero out dry nodes: anything `<= 0.0`, and NaN from masked fill values.
///
/// Small positive depths (below `1e-5` included) are kept as they are; there
/// is no wet/dry threshold above zero.
#[inline]
fn clamp_nonnegative(depth: f32) -> f32 {
    if depth > 0.0 { depth } else { 0.0 }
}
