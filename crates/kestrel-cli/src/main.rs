//! `kestrel` — command-line interface for the Kestrel CNN accelerator tools.
//!
//! ```text
//! USAGE:
//!   kestrel devices                  List supported device profiles
//!   kestrel simulate [--device D]    Run the demo network through the simulator
//!   kestrel bias [--device D]        Pack the demo network's bias memories
//!   kestrel unload [--device D]      Emit the unload stream for the demo output
//!   kestrel verify [--device D]      Emit the readback checks for the demo output
//! ```
//!
//! The demo network is a single 3x3 convolution over a ramp input; it
//! exercises the same code paths an embedding application would drive with a
//! real network description.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kestrel_chip::{Device, OutputLayout, ProcMap};
use kestrel_gen::{
    bias, unload, BiasLayer, OccupancyMap, UnloadOp, UnloadParams, VerifyOp, VerifyParams,
};
use kestrel_sim::{conv2d_layer, ConvWeights, LayerParameters, Shape, Stats, Tensor};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kestrel", about = "Kestrel CNN accelerator tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List supported device profiles.
    Devices,
    /// Run the demo network through the fixed-point simulator.
    Simulate {
        /// Device profile (KN1000 or KN2000).
        #[arg(long, default_value = "KN1000")]
        device: String,
    },
    /// Pack the demo network's bias values into the per-group memories.
    Bias {
        /// Device profile (KN1000 or KN2000).
        #[arg(long, default_value = "KN1000")]
        device: String,
    },
    /// Emit the unload operation stream for the demo network's output.
    Unload {
        /// Device profile (KN1000 or KN2000).
        #[arg(long, default_value = "KN1000")]
        device: String,
        /// Use the hardware channel rearranger.
        #[arg(long)]
        mlator: bool,
    },
    /// Emit the expected-memory checks for the demo network's output.
    Verify {
        /// Device profile (KN1000 or KN2000).
        #[arg(long, default_value = "KN1000")]
        device: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Devices => cmd_devices(),
        Cmd::Simulate { device } => cmd_simulate(&lookup_device(&device)?),
        Cmd::Bias { device } => cmd_bias(&lookup_device(&device)?),
        Cmd::Unload { device, mlator } => cmd_unload(&lookup_device(&device)?, mlator),
        Cmd::Verify { device } => cmd_verify(&lookup_device(&device)?),
    }
}

fn lookup_device(name: &str) -> Result<Device> {
    match name.to_ascii_uppercase().as_str() {
        "KN1000" => Ok(Device::KN1000),
        "KN2000" => Ok(Device::KN2000),
        other => bail!("unknown device profile '{other}' (expected KN1000 or KN2000)"),
    }
}

fn cmd_devices() -> Result<()> {
    for dev in [&Device::KN1000, &Device::KN2000] {
        println!("{}", dev.name);
        println!(
            "     Lanes {} ({} groups x {})",
            dev.max_proc(),
            dev.groups,
            dev.procs_per_group
        );
        println!(
            "     Bias  {} bytes/group, pre-scale /{}",
            dev.bias_size, dev.bias_div
        );
        println!(
            "     Bus   APB 0x{:08x}  SRAM +0x{:06x}  BRAM +0x{:06x}",
            dev.apb_base, dev.sram_base, dev.bram_base
        );
        println!(
            "     Streaming bias: {}",
            if dev.streaming_bias { "yes" } else { "no (layer-0 errata)" }
        );
        println!();
    }
    Ok(())
}

// ── Demo network ─────────────────────────────────────────────────────────────

const DEMO_IN: Shape = Shape::new(3, 8, 8);
const DEMO_OUT_CHANNELS: usize = 8;
const DEMO_OUT_OFFSET: u32 = 0x4000;

fn demo_input() -> Tensor {
    let mut t = Tensor::zeros(DEMO_IN);
    for c in 0..DEMO_IN.channels {
        for r in 0..DEMO_IN.rows {
            for col in 0..DEMO_IN.cols {
                let v = (r as i64 * 7 + col as i64 * 3 + c as i64 * 11) % 64 - 32;
                t.set(c, r, col, v);
            }
        }
    }
    t
}

fn demo_weights() -> Result<ConvWeights> {
    let mut data = Vec::with_capacity(DEMO_OUT_CHANNELS * DEMO_IN.channels * 9);
    for o in 0..DEMO_OUT_CHANNELS {
        for i in 0..DEMO_IN.channels {
            for k in 0..9 {
                let v = ((o * 31 + i * 17 + k * 5) % 33) as i64 - 16;
                data.push(v);
            }
        }
    }
    Ok(ConvWeights::new(
        0,
        DEMO_OUT_CHANNELS,
        DEMO_IN.channels,
        (3, 3),
        data,
    )?)
}

fn demo_bias() -> Vec<i64> {
    (0..DEMO_OUT_CHANNELS as i64).map(|o| o * 4 - 14).collect()
}

fn demo_layout() -> OutputLayout {
    OutputLayout {
        processor_map: ProcMap((1 << DEMO_OUT_CHANNELS) - 1),
        out_offset: DEMO_OUT_OFFSET,
        out_expand: 1,
        out_expand_thresh: 64,
        output_width: 8,
        write_gap: 0,
    }
}

fn demo_output(dev: &Device, stats: &mut Stats) -> Result<(Tensor, Shape)> {
    let mut params = LayerParameters::conv2d(DEMO_OUT_CHANNELS);
    params.activation = Some(kestrel_sim::Activation::Relu);
    let weights = demo_weights()?;
    let bias = demo_bias();
    Ok(conv2d_layer(
        0,
        &params,
        DEMO_IN,
        &weights,
        Some(&bias),
        &demo_input(),
        dev.bias_div,
        stats,
    )?)
}

fn cmd_simulate(dev: &Device) -> Result<()> {
    let mut stats = Stats::new();
    let (output, shape) = demo_output(dev, &mut stats)?;

    println!("{}: conv2d {DEMO_IN} -> {shape}", dev.name);
    println!();
    for c in 0..shape.channels {
        print!("ch{c:2}:");
        for r in 0..shape.rows.min(2) {
            for col in 0..shape.cols {
                print!(" {:4}", output.get(c, r, col));
            }
            print!("{}", if r == 0 { " |" } else { " ..." });
        }
        println!();
    }
    println!();
    println!("{stats}");
    Ok(())
}

fn cmd_bias(dev: &Device) -> Result<()> {
    let bias = demo_bias();
    let layers = [BiasLayer {
        bias: Some(&bias),
        group_map: Some(&[0, 1, 2, 3]),
        output_channels: DEMO_OUT_CHANNELS,
        streaming: false,
        conv_groups: 1,
        broadcast_mode: false,
        processor_map: demo_layout().processor_map,
        output_processor_map: demo_layout().processor_map,
        out_expand: 1,
    }];
    let alloc = bias::pack(dev, &layers, 0)?;

    for group in 0..dev.groups {
        if alloc.group_bytes[group] == 0 {
            continue;
        }
        let image = alloc.image(group);
        println!(
            "group {group}: {} of {} bytes @ 0x{:08x}",
            image.len(),
            dev.bias_size,
            dev.apb_base + dev.group_offs * group as u32 + dev.bram_base
        );
        print!("  ");
        for b in &image {
            print!("{b:02x} ");
        }
        println!();
    }
    Ok(())
}

fn cmd_unload(dev: &Device, mlator: bool) -> Result<()> {
    let mut stats = Stats::new();
    let (_, shape) = demo_output(dev, &mut stats)?;
    let params = UnloadParams {
        dev,
        layer: 0,
        layout: demo_layout(),
        shape,
        mlator,
        blocklevel: false,
    };
    let ops = unload(&params)?;

    println!("// unload: {}-bit data, shape {shape}", demo_layout().output_width);
    for op in &ops {
        print_unload_op(op);
    }
    Ok(())
}

fn print_unload_op(op: &UnloadOp) {
    match op {
        UnloadOp::SetReadAddress { addr } => {
            println!("  addr = (volatile uint32_t *) 0x{addr:08x};");
        }
        UnloadOp::FetchWord => println!("  val = *addr++;"),
        UnloadOp::SetWriteOffset { offs } => println!("  offs = 0x{offs:04x};"),
        UnloadOp::BumpWriteOffset => println!("  offs++;"),
        UnloadOp::StoreByte { shift, lane_spread } => {
            if *shift == 0 {
                println!("  out_buf[offs] = val & 0xff;");
            } else {
                println!(
                    "  out_buf[offs+0x{lane_spread:02x}] = (val >> {}) & 0xff;",
                    u32::from(*shift) * 8
                );
            }
        }
        UnloadOp::StoreByteStreaming { shift } => {
            if *shift == 0 {
                println!("  *out_buf++ = val & 0xff;");
            } else {
                println!("  *out_buf++ = (val >> {}) & 0xff;", u32::from(*shift) * 8);
            }
        }
        UnloadOp::CopyWord => println!("  *out_buf++ = *addr++;"),
        UnloadOp::SetMlatorBase { ctl, mlat } => {
            println!("  ctrl = (volatile uint32_t *) 0x{ctl:08x};");
            println!("  mlat = (volatile uint32_t *) 0x{mlat:08x};");
        }
        UnloadOp::ChannelMarker { channel } => println!("  // Channel {channel}"),
        UnloadOp::SetMlatorWritePointer { addr, value } => {
            println!("  *((volatile uint32_t *) 0x{addr:08x}) = 0x{value:08x}; // SRAM address");
        }
        UnloadOp::SetMlatorIncrement { addr, value } => {
            println!("  *((volatile uint32_t *) 0x{addr:08x}) = 0x{value:08x}; // Pointer increment");
        }
        UnloadOp::EnableMlator { addr, value, shift } => {
            println!("  *((volatile uint32_t *) 0x{addr:08x}) = 0x{value:08x}; // Enable mlator, byte {shift}");
        }
        UnloadOp::DisableMlator { addr, value } => {
            println!("  *((volatile uint32_t *) 0x{addr:08x}) = 0x{value:08x}; // Disable mlator");
        }
        UnloadOp::PrimeMlator { addr } => {
            println!("  (void) *((volatile uint32_t *) 0x{addr:08x}); // Prime");
        }
        UnloadOp::ReadMlator { channel, row, col } => {
            println!("  out_buf32[offs++] = *mlat; // {channel},{row},{col}-{}", col + 3);
        }
    }
}

fn cmd_verify(dev: &Device) -> Result<()> {
    let mut stats = Stats::new();
    let (output, shape) = demo_output(dev, &mut stats)?;
    let params = VerifyParams {
        dev,
        layer: 0,
        final_layer: 0,
        layout: demo_layout(),
        shape,
        overwrite_ok: false,
        no_error_stop: false,
        mlator: false,
        apb_base: 0,
        max_count: None,
    };
    let mut out_map = OccupancyMap::new();
    let ops = kestrel_gen::verify(&params, &output, &OccupancyMap::new(), Some(&mut out_map))?;

    for op in &ops {
        match op {
            VerifyOp::Check(c) => {
                println!(
                    "  check(0x{:08x}, 0x{:08x}); // {},{},{}-{}",
                    c.addr,
                    c.value,
                    c.row,
                    c.col,
                    c.channel,
                    c.channel + c.num_bytes - 1
                );
            }
            VerifyOp::Truncated => println!("  // Truncated further checks..."),
            other => println!("  // {other:?}"),
        }
    }
    println!("// {} words claimed", out_map.len());
    Ok(())
}
