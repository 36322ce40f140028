//! Build Diagnostics Example
//!
//! Builds a program on a simulated two-device platform, shows the per-device
//! build state, then reads back an image written through the command queue.
//!
//! Run with `RUST_LOG=clbind_core=debug` to see the layer's own logging.

use std::error::Error;

use clbind::prelude::*;
use clbind::sim::SimSession;
use tracing_subscriber::EnvFilter;

const GOOD: &str = "kernel void scale(global float* data, float factor) {}\n";
const BAD: &str = "kernel void scale(global half* data) {\n#error half precision is not enabled\n}\n";

fn main() -> std::result::Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let session = SimSession::new(&["gpu0", "gpu1"])?;
    println!("Platform: {} devices", session.devices.len());

    let program = session.context.create_program_with_source(&[GOOD])?;
    program.build(&[], "-D N=4")?;
    for device in &session.devices {
        println!(
            "  {}: {:?} with {:?}",
            device.name(),
            program.build_status(device)?,
            program.build_options(device)?
        );
    }
    let kernel = program.create_kernel("scale")?;
    println!("Kernel {} takes {} arguments\n", kernel.function_name()?, kernel.num_args()?);

    let broken = session.context.create_program_with_source(&[BAD])?;
    match broken.build(&[], "") {
        Err(ClError::Build(err)) => println!("Build failed as expected:\n  {}\n", err),
        other => println!("Unexpected build outcome: {:?}\n", other),
    }

    let format = ImageFormat::new(ChannelOrder::RGBA, ChannelDataType::UnsignedInt8);
    let image = session
        .context
        .create_image(MemFlags::READ_WRITE, &format, &ImageDescriptor::image_2d(2, 2), None)?;
    let pixels: Vec<u8> = (0..16).collect();
    session
        .queue
        .write_image_blocking(&image, [0, 0, 0], [2, 2, 1], 0, 0, &pixels, &[])?;

    let mut readback = vec![0u8; 16];
    let event = session
        .queue
        .read_image_blocking(&image, [0, 0, 0], [2, 2, 1], 0, 0, &mut readback, &[])?;
    println!("Read back {:?} ({:?})", readback, event.status()?);

    Ok(())
}
