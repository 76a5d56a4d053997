//! 3-D texture builder
//!
//! Same `y, z, x` sweep as the grid. Texels are written in image order
//! (`x + y*W + z*W*H`) as BGRA bytes; alpha is 255 for present voxels and
//! 0 otherwise.

use glam::{IVec3, UVec3, Vec3};

use super::{BuildError, GenerationInfo, ProgressClock, StopToken};
use crate::source::VoxelSource;

/// Texel byte order matches `wgpu::TextureFormat::Bgra8Unorm`.
#[derive(Debug, Clone, Default)]
pub struct TexturePayload {
    pub dimensions: UVec3,
    pub texels: Vec<[u8; 4]>,
}

impl TexturePayload {
    #[inline]
    pub fn index(&self, pos: UVec3) -> usize {
        let d = self.dimensions;
        pos.x as usize + pos.y as usize * d.x as usize + pos.z as usize * (d.x * d.y) as usize
    }

    /// RGB bytes at `pos` if the texel is occupied.
    pub fn lookup(&self, pos: UVec3) -> Option<[u8; 3]> {
        let d = self.dimensions;
        if pos.x >= d.x || pos.y >= d.y || pos.z >= d.z {
            return None;
        }
        let [b, g, r, a] = *self.texels.get(self.index(pos))?;
        (a == 255).then_some([r, g, b])
    }

    pub fn byte_size(&self) -> u64 {
        (self.texels.len() * 4) as u64
    }
}

#[inline]
fn to_bgra(colour: Option<Vec3>) -> [u8; 4] {
    match colour {
        Some(c) => {
            let c = (c.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
            [c.z as u8, c.y as u8, c.x as u8, 255]
        }
        None => [0, 0, 0, 0],
    }
}

pub fn build_texture(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<TexturePayload, BuildError> {
    let dims = source.dimensions();
    let total = source.volume();
    let clock = ProgressClock::start(info);
    info.set_voxel_count(0);

    let mut payload = TexturePayload {
        dimensions: dims,
        texels: vec![[0; 4]; total as usize],
    };

    let mut done = 0u64;
    for y in 0..dims.y {
        for z in 0..dims.z {
            for x in 0..dims.x {
                stop.check()?;

                let sample = source.sample(IVec3::new(x as i32, y as i32, z as i32));
                if sample.is_some() {
                    info.add_voxels(1);
                }
                let index = payload.index(UVec3::new(x, y, z));
                payload.texels[index] = to_bgra(sample);

                done += 1;
                clock.record(done, total);
            }
        }
    }

    info.set_node_count(total);
    clock.finish();
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DenseSource;

    #[test]
    fn test_texels_are_bgra_with_alpha_occupancy() {
        let mut source = DenseSource::new(UVec3::new(2, 3, 2));
        source.set(UVec3::new(1, 2, 0), Some(Vec3::new(1.0, 0.5, 0.0)));

        let info = GenerationInfo::new();
        let texture = build_texture(&source, &info, &StopToken::new()).unwrap();

        let texel = texture.texels[texture.index(UVec3::new(1, 2, 0))];
        assert_eq!(texel, [0, 128, 255, 255]);
        assert_eq!(texture.lookup(UVec3::new(1, 2, 0)), Some([255, 128, 0]));
        assert_eq!(texture.lookup(UVec3::new(0, 0, 0)), None);
        assert_eq!(texture.texels.iter().filter(|t| t[3] == 0).count(), 11);
        assert_eq!(info.voxel_count(), 1);
    }

    #[test]
    fn test_cancelled_texture_build() {
        let source = DenseSource::new(UVec3::splat(4));
        let stop = StopToken::new();
        stop.request_stop();
        let result = build_texture(&source, &GenerationInfo::new(), &stop);
        assert_eq!(result.unwrap_err(), BuildError::Cancelled);
    }
}
