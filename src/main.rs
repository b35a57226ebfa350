use anyhow::Result;
use log::*;

use engine::glam::Vec3;
use engine::{Engine, EngineConfig, TextureData};

fn main() -> Result<()> {
    pretty_env_logger::init();

    let texture = match std::env::args().nth(1) {
        Some(path) => TextureData::load(&path)?,
        None => {
            info!("No texture given, using a checkerboard.");
            TextureData::checkerboard(256, 8)
        }
    };

    let config = EngineConfig::default()
        .with_title("Mix Engine")
        .with_clear_color([0.02, 0.02, 0.03, 1.0]);
    let vertex_shader = config.vertex_shader.clone();
    let fragment_shader = config.fragment_shader.clone();

    let engine = Engine::new(config, |renderer| {
        let pipeline = renderer.build_pipeline_from_files(&vertex_shader, &fragment_shader)?;

        for x in [-1.5, 0.0, 1.5] {
            let object = renderer.create_object(&texture)?;
            renderer.set_object_offset(object, Vec3::new(x, 0.0, 0.0))?;
            renderer.bind_object_to_pipeline(pipeline, object)?;
        }

        Ok(())
    });

    match engine {
        Err(err) => {
            error!("{:#}", err);
            Err(err)
        }
        Ok(e) => e.run(),
    }
}
