//! Build every acceleration structure from a procedural scene
//!
//! CPU builders run on worker threads first. If a GPU adapter is present,
//! each structure is then uploaded and rendered headless for a few frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::{UVec2, UVec3, Vec3};
use voxray::camera::look_at;
use voxray::generation::{
    build_brickmap, build_contree, build_grid, build_octree, build_texture, BuildPoll, BuildTask,
    GenerationInfo, StopToken,
};
use voxray::{EquationSource, GpuContext, RendererConfig, StructureType, VoxelSource, Voxray};

const SIDE: u32 = 128;

fn run_build<T, F>(name: &'static str, source: Arc<dyn VoxelSource>, build: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn VoxelSource, &GenerationInfo, &StopToken) -> Result<T, voxray::generation::BuildError>
        + Send
        + 'static,
{
    let mut task = BuildTask::new(name);
    task.launch(move |info, stop| build(source.as_ref(), info, stop));

    loop {
        match task.poll() {
            BuildPoll::Finished(payload) => {
                let info = task.info();
                println!(
                    "{:<9} {:>8} voxels {:>9} nodes {:>7.3}s",
                    name,
                    info.voxel_count(),
                    info.node_count(),
                    info.elapsed_seconds()
                );
                return Ok(payload);
            }
            BuildPoll::Failed | BuildPoll::Idle => anyhow::bail!("{} build failed", name),
            BuildPoll::Running => std::thread::sleep(Duration::from_millis(5)),
        }
    }
}

fn build_on_cpu(source: Arc<dyn VoxelSource>) -> Result<()> {
    println!("CPU builds over {:?}", source.dimensions());

    let grid = run_build("Grid", source.clone(), build_grid)?;
    let texture = run_build("Texture", source.clone(), build_texture)?;
    let octree = run_build("Octree", source.clone(), build_octree)?;
    let contree = run_build("Contree", source.clone(), build_contree)?;
    let brickmap = run_build("Brickmap", source, build_brickmap)?;

    println!(
        "payload bytes: grid {} texture {} octree {} contree {} brickmap {}",
        grid.byte_size(),
        texture.byte_size(),
        octree.byte_size(),
        contree.byte_size(),
        brickmap.byte_size()
    );
    Ok(())
}

fn render_on_gpu(source: Arc<dyn VoxelSource>) -> Result<()> {
    let gpu = match GpuContext::headless() {
        Ok(gpu) => gpu,
        Err(e) => {
            println!("No GPU available ({}), skipping uploads", e);
            return Ok(());
        }
    };

    let config = RendererConfig {
        shader_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/src/shaders").into(),
        watch_shaders: false,
        ..Default::default()
    };
    let mut voxray = Voxray::new(gpu, &config, UVec2::new(640, 360)).context("initialise renderer")?;
    let camera = look_at(Vec3::new(-40.0, 150.0, -40.0), Vec3::splat(SIDE as f32 * 0.5));

    for ty in StructureType::ALL {
        voxray.manager.set_type(ty);
        voxray.load(source.clone());

        let deadline = Instant::now() + Duration::from_secs(60);
        while !voxray.manager.finished_generation() && Instant::now() < deadline {
            voxray.render_frame(&camera, 0.016);
        }
        for _ in 0..3 {
            voxray.render_frame(&camera, 0.016);
        }

        println!(
            "{:<9} {:>10} bytes on GPU, {:.2} bytes/voxel, status {}",
            ty,
            voxray.manager.memory_usage(),
            voxray.manager.bytes_per_voxel(),
            voxray.manager.status()
        );
    }

    voxray.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let source: Arc<dyn VoxelSource> = Arc::new(EquationSource::terrain(
        UVec3::new(SIDE, SIDE / 2, SIDE),
        Vec3::new(0.35, 0.6, 0.25),
    ));

    build_on_cpu(source.clone())?;
    render_on_gpu(source)
}
