//! Unload stream generation.
//!
//! Walks the output layout channel-quad by channel-quad and emits the
//! operation stream that moves accelerator output memory into a flat
//! channel-major host buffer. The traversal keeps a model of the read and
//! write cursors so redundant pointer loads collapse into increments; the
//! emitted stream is specific to one layer configuration.

use kestrel_chip::{popcount, regs, Device, OutputLayout};
use kestrel_sim::Shape;

use crate::error::{KestrelGenError, Result};
use crate::ops::UnloadOp;

/// Configuration of one unload pass.
#[derive(Debug, Clone)]
pub struct UnloadParams<'a> {
    /// Target device.
    pub dev: &'a Device,
    /// Layer index, for diagnostics only.
    pub layer: usize,
    /// Output memory layout of the unloaded layer. Unload layouts are always
    /// dense: `write_gap` is a verify-side concept and must be zero here.
    pub layout: OutputLayout,
    /// Logical shape of the unloaded data.
    pub shape: Shape,
    /// True to use the hardware channel rearranger instead of byte
    /// singulation. Requires 8-bit output data.
    pub mlator: bool,
    /// True when generating block-level test vectors, which cannot drive
    /// the mlator.
    pub blocklevel: bool,
}

/// Generate the unload operation stream for one layer's output.
pub fn unload(params: &UnloadParams<'_>) -> Result<Vec<UnloadOp>> {
    let dev = params.dev;
    let layout = &params.layout;
    let shape = params.shape;
    let out_size = layout.out_size();

    if params.blocklevel && params.mlator {
        return Err(KestrelGenError::MlatorBlocklevel {
            layer: params.layer,
        });
    }
    // Unload addressing is gapless; a nonzero write gap would silently shift
    // every read past the first.
    debug_assert_eq!(layout.write_gap, 0);

    let coffs_start = layout.coffs_start(dev);
    let next_layer_map_init = layout.processor_map.0 >> coffs_start;
    let mut next_layer_map = next_layer_map_init;

    let mut ops = Vec::new();
    let mut read_addr: Option<u32> = None;
    let mut write_addr: Option<u32> = None;
    let mut mlat_base: Option<u32> = None;
    let mut poffs = coffs_start;
    let mut c = 0;

    while c < shape.channels {
        if c % layout.out_expand_thresh == 0 {
            // Channels beyond one pass wrap onto the first processors.
            poffs = coffs_start;
            next_layer_map = next_layer_map_init;
        }
        let expand = c / layout.out_expand_thresh;
        let proc = poffs & !(dev.shared_procs - 1);

        if !params.mlator || out_size > 1 {
            for doffs in 0..shape.spatial() {
                let (row, col) = (doffs / shape.cols, doffs % shape.cols);
                let mut this_map = next_layer_map;
                let mut this_c = c;

                let offs = layout.data_offset(dev, proc, doffs, expand);
                if read_addr != Some(offs) {
                    ops.push(UnloadOp::SetReadAddress {
                        addr: dev.apb_base + dev.sram_base + offs,
                    });
                }
                if out_size == 4 {
                    read_addr = Some(offs);
                } else {
                    ops.push(UnloadOp::FetchWord);
                    read_addr = Some(offs + 4);
                }

                // Singulate bytes, ignoring unused processors.
                for shift in 0..4u8 {
                    let addr = (this_c * shape.spatial() + row * shape.rows + col) as u32;
                    if (shift == 0 || out_size > 1) && out_size != 4 && shape.spatial() != 1 {
                        if write_addr == Some(addr) {
                            ops.push(UnloadOp::BumpWriteOffset);
                        } else {
                            ops.push(UnloadOp::SetWriteOffset { offs: addr });
                        }
                        write_addr = Some(addr + 1);
                    }
                    if this_map & 1 == 1 {
                        if out_size == 4 {
                            ops.push(UnloadOp::CopyWord);
                            write_addr = Some(addr + 4);
                            read_addr = read_addr.map(|a| a + 4);
                        } else if shape.spatial() == 1 {
                            ops.push(UnloadOp::StoreByteStreaming { shift });
                        } else {
                            ops.push(UnloadOp::StoreByte {
                                shift,
                                lane_spread: 0x10 * u32::from(shift),
                            });
                        }
                        this_c += 1;
                    }
                    this_map >>= 1;
                }
            }
        } else {
            unload_mlator(
                dev,
                layout,
                shape,
                proc,
                expand,
                c,
                next_layer_map,
                &mut ops,
                &mut read_addr,
                &mut write_addr,
                &mut mlat_base,
            );
        }

        poffs += 4;
        c += popcount(next_layer_map & 0xf);
        next_layer_map >>= 4;
    }

    Ok(ops)
}

/// One channel quad's worth of mlator reads. The rearranger packs four
/// spatial bytes of a single channel per word, so each active channel is
/// drained in full before moving to the next byte lane.
fn unload_mlator(
    dev: &Device,
    layout: &OutputLayout,
    shape: Shape,
    proc: usize,
    expand: usize,
    c: usize,
    next_layer_map: u64,
    ops: &mut Vec<UnloadOp>,
    read_addr: &mut Option<u32>,
    write_addr: &mut Option<u32>,
    mlat_base: &mut Option<u32>,
) {
    let group = proc / dev.procs_per_group;
    let mlat = regs::ctl_addr(dev, group, regs::REG_MLAT);
    let ctl = regs::ctl_addr(dev, group, regs::REG_CTL);
    if *mlat_base != Some(mlat) {
        *mlat_base = Some(mlat);
        ops.push(UnloadOp::SetMlatorBase { ctl, mlat });
    }

    let mut this_map = next_layer_map;
    let mut this_c = c;
    for shift in 0..4u8 {
        if this_map & 1 == 1 {
            ops.push(UnloadOp::ChannelMarker { channel: this_c });

            for doffs in (0..shape.spatial()).step_by(4) {
                let (row, col) = (doffs / shape.cols, doffs % shape.cols);
                let source = layout.data_offset(dev, proc, doffs >> 2, expand);
                let target = (this_c * shape.spatial() + row * shape.rows + col) as u32;
                debug_assert_eq!(target & 3, 0);

                if *write_addr != Some(target) {
                    ops.push(UnloadOp::SetWriteOffset { offs: target >> 2 });
                }
                if *read_addr != Some(source) {
                    if doffs != 0 {
                        ops.push(UnloadOp::DisableMlator {
                            addr: ctl,
                            value: regs::mlator_disable(dev),
                        });
                    }
                    ops.push(UnloadOp::SetMlatorWritePointer {
                        addr: regs::lreg_addr(dev, group, regs::LREG_WPTR_BASE),
                        value: doffs as u32,
                    });
                    ops.push(UnloadOp::SetMlatorIncrement {
                        addr: regs::lreg_addr(dev, group, regs::LREG_LCTL2),
                        value: expand as u32,
                    });
                    ops.push(UnloadOp::EnableMlator {
                        addr: ctl,
                        value: regs::mlator_enable(dev, u32::from(shift)),
                        shift,
                    });
                    ops.push(UnloadOp::PrimeMlator { addr: mlat });
                }

                ops.push(UnloadOp::ReadMlator {
                    channel: this_c,
                    row,
                    col,
                });
                *read_addr = Some(source + 4);
                *write_addr = Some(target + 4);
            }

            ops.push(UnloadOp::DisableMlator {
                addr: ctl,
                value: regs::mlator_disable(dev),
            });
        }
        this_c += 1;
        this_map >>= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chip::ProcMap;

    fn params(dev: &Device, map: u64, width: usize, shape: Shape) -> UnloadParams<'_> {
        UnloadParams {
            dev,
            layer: 0,
            layout: OutputLayout {
                processor_map: ProcMap(map),
                out_offset: 0x4000,
                out_expand: 1,
                out_expand_thresh: 64,
                output_width: width,
                write_gap: 0,
            },
            shape,
            mlator: false,
            blocklevel: false,
        }
    }

    #[test]
    fn dense_quad_reads_one_word_per_position() {
        let dev = Device::KN1000;
        let p = params(&dev, 0xf, 8, Shape::new(4, 2, 2));
        let ops = unload(&p).unwrap();
        // One pointer load, then per spatial position one fetch plus four
        // stores, with offset bookkeeping for lane 0 only.
        assert_eq!(
            ops[0],
            UnloadOp::SetReadAddress {
                addr: dev.apb_base + dev.sram_base + 0x4000
            }
        );
        assert_eq!(ops[1], UnloadOp::FetchWord);
        let fetches = ops.iter().filter(|o| **o == UnloadOp::FetchWord).count();
        assert_eq!(fetches, 4);
        let stores = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::StoreByte { .. }))
            .count();
        assert_eq!(stores, 16);
        // Sequential reads collapse into a single pointer load.
        let loads = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::SetReadAddress { .. }))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn byte_lanes_spread_channel_offsets() {
        let dev = Device::KN1000;
        let p = params(&dev, 0xf, 8, Shape::new(4, 4, 4));
        let ops = unload(&p).unwrap();
        assert!(ops.contains(&UnloadOp::StoreByte {
            shift: 3,
            lane_spread: 0x30
        }));
    }

    #[test]
    fn single_spatial_position_streams_bytes() {
        let dev = Device::KN1000;
        let p = params(&dev, 0x7, 8, Shape::new(3, 1, 1));
        let ops = unload(&p).unwrap();
        assert!(!ops.iter().any(|o| matches!(o, UnloadOp::SetWriteOffset { .. })));
        let stores = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::StoreByteStreaming { .. }))
            .count();
        assert_eq!(stores, 3);
    }

    #[test]
    fn wide_output_copies_words() {
        let dev = Device::KN1000;
        let p = params(&dev, 0x1, 32, Shape::new(1, 2, 2));
        let ops = unload(&p).unwrap();
        assert!(!ops.contains(&UnloadOp::FetchWord));
        let copies = ops.iter().filter(|o| **o == UnloadOp::CopyWord).count();
        assert_eq!(copies, 4);
    }

    #[test]
    fn mlator_emits_register_sequence() {
        let dev = Device::KN1000;
        let mut p = params(&dev, 0x3, 8, Shape::new(2, 4, 4));
        p.mlator = true;
        let ops = unload(&p).unwrap();
        assert_eq!(
            ops[0],
            UnloadOp::SetMlatorBase {
                ctl: regs::ctl_addr(&dev, 0, regs::REG_CTL),
                mlat: regs::ctl_addr(&dev, 0, regs::REG_MLAT),
            }
        );
        assert!(ops.contains(&UnloadOp::ChannelMarker { channel: 1 }));
        // Each channel covers 16 spatial bytes: four packed words.
        let reads = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::ReadMlator { .. }))
            .count();
        assert_eq!(reads, 8);
        // Enable once per channel, disable after each.
        let enables = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::EnableMlator { .. }))
            .count();
        assert_eq!(enables, 2);
    }

    #[test]
    fn channel_expansion_wraps_onto_first_lanes() {
        let dev = Device::KN1000;
        let mut p = params(&dev, 0xf, 8, Shape::new(8, 1, 2));
        p.layout.out_expand = 2;
        p.layout.out_expand_thresh = 4;
        let ops = unload(&p).unwrap();
        // Eight channels on four lanes: channels 4..8 re-walk lanes 0..4 one
        // word further in. The interleaved pitch breaks read continuity at
        // every position, so each word needs its own pointer load, ordered
        // pass 0 (words 0, 2) then pass 1 (words 1, 3).
        let base = dev.apb_base + dev.sram_base + 0x4000;
        let loads: Vec<u32> = ops
            .iter()
            .filter_map(|o| match o {
                UnloadOp::SetReadAddress { addr } => Some(*addr),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec![base, base + 8, base + 4, base + 12]);
        let stores = ops
            .iter()
            .filter(|o| matches!(o, UnloadOp::StoreByte { .. }))
            .count();
        assert_eq!(stores, 16);
    }

    #[test]
    #[should_panic]
    fn gapped_layout_is_rejected() {
        let dev = Device::KN1000;
        let mut p = params(&dev, 0xf, 8, Shape::new(4, 2, 2));
        p.layout.write_gap = 1;
        let _ = unload(&p);
    }

    #[test]
    fn mlator_rejects_blocklevel() {
        let dev = Device::KN1000;
        let mut p = params(&dev, 0x3, 8, Shape::new(2, 4, 4));
        p.mlator = true;
        p.blocklevel = true;
        assert!(matches!(
            unload(&p),
            Err(KestrelGenError::MlatorBlocklevel { layer: 0 })
        ));
    }
}
