use crate::error::MappingError;
use crate::lixel::Lixel;

/// A lixel carrying the density value the engine computed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityLixel {
    pub lixel: Lixel,
    pub value: f64,
}

pub struct ResultMapper;

impl ResultMapper {
    /// Pair engine values with lixels by position. Position is the only key
    /// the two sequences share, so any length difference is fatal.
    pub fn map(lixels: Vec<Lixel>, values: Vec<f64>) -> Result<Vec<DensityLixel>, MappingError> {
        if lixels.len() != values.len() {
            return Err(MappingError::LengthMismatch {
                lixels: lixels.len(),
                values: values.len(),
            });
        }
        Ok(lixels
            .into_iter()
            .zip(values)
            .map(|(lixel, value)| DensityLixel { lixel, value })
            .collect())
    }
}
