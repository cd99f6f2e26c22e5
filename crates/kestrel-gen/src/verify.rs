//! Verify stream generation with memory occupancy tracking.
//!
//! Packs the simulator's reference output into the words the hardware wrote
//! and emits one check per word. While walking, every claimed word address is
//! recorded in an occupancy map and collisions with the input data or with
//! earlier output words are reported, since an overwritten word makes the
//! readback compare against stale data.

use std::collections::HashMap;
use std::fmt;

use kestrel_chip::{ffs, regs, Device, OutputLayout};
use kestrel_sim::{Shape, Tensor};
use tracing::warn;

use crate::error::{KestrelGenError, Result};
use crate::ops::{CheckWord, VerifyOp};

/// Origin of one written memory word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRecord {
    /// Writing layer, or `None` for the input loader.
    pub layer: Option<usize>,
    /// Logical channel.
    pub channel: usize,
    /// Spatial row.
    pub row: usize,
    /// Spatial column.
    pub col: usize,
    /// Word value written.
    pub value: u32,
}

impl fmt::Display for MemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layer {
            Some(ll) => write!(
                f,
                "layer {ll}, CHW={},{},{}, value 0x{:08x}",
                self.channel, self.row, self.col, self.value
            ),
            None => write!(
                f,
                "the input loader, CHW={},{},{}",
                self.channel, self.row, self.col
            ),
        }
    }
}

/// Sparse map from data-memory word address to the write that claimed it.
#[derive(Debug, Clone, Default)]
pub struct OccupancyMap {
    slots: HashMap<u32, MemRecord>,
}

impl OccupancyMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `word` (a byte offset divided by 4) was claimed.
    pub fn insert(&mut self, word: u32, record: MemRecord) {
        self.slots.insert(word, record);
    }

    /// Prior claim on `word`, if any.
    #[must_use]
    pub fn get(&self, word: u32) -> Option<&MemRecord> {
        self.slots.get(&word)
    }

    /// Number of claimed words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing was claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Configuration of one verify pass.
#[derive(Debug, Clone)]
pub struct VerifyParams<'a> {
    /// Target device.
    pub dev: &'a Device,
    /// Layer being verified.
    pub layer: usize,
    /// Final layer of the network; its checks are flagged as network output.
    pub final_layer: usize,
    /// Output memory layout of the verified layer.
    pub layout: OutputLayout,
    /// Logical shape of the verified data.
    pub shape: Shape,
    /// Suppress overwrite errors entirely.
    pub overwrite_ok: bool,
    /// Downgrade overwrite errors to warnings.
    pub no_error_stop: bool,
    /// Use the hardware channel rearranger for readback.
    pub mlator: bool,
    /// Peripheral-bus base added to mlator register addresses.
    pub apb_base: u32,
    /// Stop emitting checks after this many words (the stream gets a
    /// truncation marker).
    pub max_count: Option<usize>,
}

/// Generate the verify operation stream for one layer's output.
///
/// `out_buf` holds the simulator's reference values. `in_map` carries the
/// words claimed by the input loader; claimed output words are added to
/// `out_map` when provided.
pub fn verify(
    params: &VerifyParams<'_>,
    out_buf: &Tensor,
    in_map: &OccupancyMap,
    mut out_map: Option<&mut OccupancyMap>,
) -> Result<Vec<VerifyOp>> {
    let dev = params.dev;
    let layout = &params.layout;
    let shape = params.shape;
    let out_size = layout.out_size();

    let coffs_start = layout.coffs_start(dev);
    let next_layer_map = layout.processor_map.0 >> coffs_start;

    let mut ops = Vec::new();

    if !params.mlator || out_size > 1 {
        if params.mlator {
            warn!("ignoring mlator for wide output");
        }
        let mut count = 0usize;

        for doffs in 0..shape.spatial() {
            let (row, col) = (doffs / shape.cols, doffs % shape.cols);
            let mut this_map = next_layer_map;
            let mut poffs = coffs_start;
            let mut c = 0;
            while c < shape.channels {
                if c % layout.out_expand_thresh == 0 {
                    poffs = coffs_start;
                    this_map = next_layer_map;
                }

                let this_c = c;
                let expand = c / layout.out_expand_thresh;
                let proc = poffs & !(dev.shared_procs - 1);

                // Pack up to four adjacent channels into the word the
                // hardware wrote, skipping unused processors.
                let mut no_data = true;
                let mut packed = 0u32;
                let mut words = [0u32; 4];
                if out_size == 1 {
                    for _ in 0..4 {
                        packed >>= 8;
                        if this_map & 1 == 1 {
                            no_data = false;
                            if c < shape.channels {
                                packed |= ((out_buf.get(c, row, col) as u32) & 0xff) << 24;
                            }
                            c += 1;
                        }
                        this_map >>= 1;
                    }
                } else {
                    for word in &mut words {
                        if this_map & 1 == 1 {
                            no_data = false;
                            if c < shape.channels {
                                *word = out_buf.get(c, row, col) as u32;
                            }
                            c += 1;
                        }
                        this_map >>= 1;
                    }
                }

                let offs = dev.sram_base + layout.data_offset(dev, proc, doffs, expand);

                if !no_data {
                    let num_bytes = (c - this_c).min(shape.channels - this_c);
                    if out_size == 1 {
                        check_overwrite(params, proc, offs, in_map, out_map.as_deref(), this_c, row, col)?;
                        if let Some(map) = out_map.as_deref_mut() {
                            map.insert(
                                offs >> 2,
                                MemRecord {
                                    layer: Some(params.layer),
                                    channel: this_c,
                                    row,
                                    col,
                                    value: packed,
                                },
                            );
                        }
                        if params.max_count.map_or(true, |m| count < m) {
                            ops.push(VerifyOp::Check(CheckWord {
                                addr: offs,
                                value: packed,
                                num_bytes,
                                first_proc: ffs(layout.processor_map.0 >> proc).unwrap_or(0) % 4,
                                is_final_output: params.layer == params.final_layer,
                                channel: this_c,
                                row,
                                col,
                            }));
                        }
                    } else {
                        let mut offs = offs;
                        for (i, &word) in words.iter().enumerate().take(num_bytes.min(out_size)) {
                            check_overwrite(
                                params,
                                proc,
                                offs,
                                in_map,
                                out_map.as_deref(),
                                this_c,
                                row,
                                col,
                            )?;
                            if let Some(map) = out_map.as_deref_mut() {
                                map.insert(
                                    offs >> 2,
                                    MemRecord {
                                        layer: Some(params.layer),
                                        channel: this_c,
                                        row,
                                        col,
                                        value: word,
                                    },
                                );
                            }
                            if params.max_count.map_or(true, |m| count < m) {
                                ops.push(VerifyOp::Check(CheckWord {
                                    addr: offs,
                                    value: word,
                                    num_bytes: out_size,
                                    first_proc: 0,
                                    is_final_output: params.layer == params.final_layer,
                                    channel: this_c + i,
                                    row,
                                    col,
                                }));
                            }
                            offs += out_size as u32;
                        }
                    }
                    count += 1;
                    if Some(count) == params.max_count {
                        ops.push(VerifyOp::Truncated);
                    }
                }

                poffs += 4;
            }
        }
    } else {
        verify_mlator(params, out_buf, in_map, out_map, &mut ops)?;
    }

    Ok(ops)
}

/// Mlator readback: one packed word per four spatial columns of one channel.
fn verify_mlator(
    params: &VerifyParams<'_>,
    out_buf: &Tensor,
    in_map: &OccupancyMap,
    mut out_map: Option<&mut OccupancyMap>,
    ops: &mut Vec<VerifyOp>,
) -> Result<()> {
    let dev = params.dev;
    let layout = &params.layout;
    let shape = params.shape;

    let coffs_start = layout.coffs_start(dev);
    let next_layer_map = layout.processor_map.0 >> coffs_start;

    let mut c = 0;
    let mut poffs = coffs_start;
    let mut this_map = next_layer_map;
    let mut read_addr: Option<u32> = None;

    while c < shape.channels {
        if c % layout.out_expand_thresh == 0 {
            poffs = coffs_start;
            this_map = next_layer_map;
        }

        let expand = c / layout.out_expand_thresh;
        let proc = poffs & !(dev.shared_procs - 1);
        let group = proc / dev.procs_per_group;
        let mlat = regs::ctl_addr(dev, group, regs::REG_MLAT);
        let ctl = regs::ctl_addr(dev, group, regs::REG_CTL);

        for shift in 0..4u8 {
            if this_map & 1 == 1 {
                for doffs in (0..shape.spatial()).step_by(4) {
                    let (row, col) = (doffs / shape.cols, doffs % shape.cols);

                    let mut packed = 0u32;
                    for i in 0..4 {
                        packed >>= 8;
                        if col + i < shape.cols {
                            packed |= ((out_buf.get(c, row, col + i) as u32) & 0xff) << 24;
                        }
                    }

                    // The rearranger walks expansion passes on its own; the
                    // source address only advances spatially.
                    let source = layout.data_offset(dev, proc, doffs >> 2, 0);

                    if read_addr != Some(source) {
                        if doffs != 0 {
                            ops.push(VerifyOp::DisableMlator {
                                addr: params.apb_base + ctl,
                                value: regs::mlator_disable(dev),
                            });
                        }
                        ops.push(VerifyOp::SetMlatorWritePointer {
                            addr: params.apb_base
                                + regs::lreg_addr(dev, group, regs::LREG_WPTR_BASE),
                            value: source >> 2,
                        });
                        ops.push(VerifyOp::SetMlatorIncrement {
                            addr: params.apb_base + regs::lreg_addr(dev, group, regs::LREG_LCTL2),
                            value: expand as u32,
                        });
                        ops.push(VerifyOp::EnableMlator {
                            addr: params.apb_base + ctl,
                            value: regs::mlator_enable(dev, u32::from(shift)),
                            shift,
                        });
                        ops.push(VerifyOp::PrimeMlator {
                            addr: params.apb_base + mlat,
                        });
                    }

                    let num_bytes = 4.min(shape.cols - col);
                    check_overwrite(
                        params,
                        proc,
                        dev.sram_base + source,
                        in_map,
                        out_map.as_deref(),
                        c,
                        row,
                        col,
                    )?;
                    if let Some(map) = out_map.as_deref_mut() {
                        map.insert(
                            source >> 2,
                            MemRecord {
                                layer: Some(params.layer),
                                channel: c,
                                row,
                                col,
                                value: packed,
                            },
                        );
                    }
                    ops.push(VerifyOp::Check(CheckWord {
                        addr: mlat,
                        value: packed,
                        num_bytes,
                        first_proc: 0,
                        is_final_output: params.layer == params.final_layer,
                        channel: c,
                        row,
                        col,
                    }));

                    read_addr = Some(source + 4);
                }
                ops.push(VerifyOp::DisableMlator {
                    addr: params.apb_base + ctl,
                    value: regs::mlator_disable(dev),
                });
            }

            this_map >>= 1;
            c += 1;
        }

        poffs += 4;
    }
    Ok(())
}

/// Collision check against the input loader's words and earlier output
/// words. `no_error_stop` downgrades the error to a warning.
fn check_overwrite(
    params: &VerifyParams<'_>,
    proc: usize,
    target_offs: u32,
    in_map: &OccupancyMap,
    out_map: Option<&OccupancyMap>,
    c: usize,
    row: usize,
    col: usize,
) -> Result<()> {
    if params.overwrite_ok {
        return Ok(());
    }
    let previous = in_map
        .get(target_offs >> 2)
        .or_else(|| out_map.and_then(|m| m.get(target_offs >> 2)));
    if let Some(previous) = previous {
        let err = KestrelGenError::Overwrite {
            processor: proc,
            layer: params.layer,
            channel: c,
            row,
            col,
            offset: target_offs,
            previous: previous.clone(),
        };
        if params.no_error_stop {
            warn!("{err}");
        } else {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chip::ProcMap;

    fn params(dev: &Device, map: u64, width: usize, shape: Shape) -> VerifyParams<'_> {
        VerifyParams {
            dev,
            layer: 0,
            final_layer: 0,
            layout: OutputLayout {
                processor_map: ProcMap(map),
                out_offset: 0x4000,
                out_expand: 1,
                out_expand_thresh: 64,
                output_width: width,
                write_gap: 0,
            },
            shape,
            overwrite_ok: false,
            no_error_stop: false,
            mlator: false,
            apb_base: 0,
            max_count: None,
        }
    }

    fn ramp(shape: Shape) -> Tensor {
        let mut t = Tensor::zeros(shape);
        for c in 0..shape.channels {
            for r in 0..shape.rows {
                for col in 0..shape.cols {
                    t.set(c, r, col, (c * shape.spatial() + r * shape.cols + col) as i64);
                }
            }
        }
        t
    }

    #[test]
    fn packs_four_channels_per_word() {
        let dev = Device::KN1000;
        let shape = Shape::new(4, 1, 1);
        let p = params(&dev, 0xf, 8, shape);
        let buf = ramp(shape);
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        assert_eq!(ops.len(), 1);
        let VerifyOp::Check(check) = &ops[0] else {
            panic!("expected check");
        };
        // Channels 0..4 hold 0,1,2,3; packed little-endian by lane.
        assert_eq!(check.value, 0x0302_0100);
        assert_eq!(check.num_bytes, 4);
        assert_eq!(check.addr, dev.sram_base + 0x4000);
        assert!(check.is_final_output);
    }

    #[test]
    fn sparse_map_leaves_lanes_clear() {
        let dev = Device::KN1000;
        let shape = Shape::new(2, 1, 1);
        // Lanes 0 and 2 active; lanes 1 and 3 stay zero.
        let p = params(&dev, 0b101, 8, shape);
        let mut buf = Tensor::zeros(shape);
        buf.set(0, 0, 0, 0x11);
        buf.set(1, 0, 0, 0x22);
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        let VerifyOp::Check(check) = &ops[0] else {
            panic!("expected check");
        };
        assert_eq!(check.value, 0x0022_0011);
        assert_eq!(check.num_bytes, 2);
    }

    #[test]
    fn records_occupancy() {
        let dev = Device::KN1000;
        let shape = Shape::new(4, 2, 2);
        let p = params(&dev, 0xf, 8, shape);
        let buf = ramp(shape);
        let mut out_map = OccupancyMap::new();
        let ops = verify(&p, &buf, &OccupancyMap::new(), Some(&mut out_map)).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(out_map.len(), 4);
        let rec = out_map.get((dev.sram_base + 0x4000) >> 2).unwrap();
        assert_eq!(rec.layer, Some(0));
        assert_eq!((rec.row, rec.col), (0, 0));
    }

    #[test]
    fn overwrite_of_input_is_fatal() {
        let dev = Device::KN1000;
        let shape = Shape::new(4, 1, 1);
        let p = params(&dev, 0xf, 8, shape);
        let buf = ramp(shape);
        let mut in_map = OccupancyMap::new();
        in_map.insert(
            (dev.sram_base + 0x4000) >> 2,
            MemRecord {
                layer: None,
                channel: 0,
                row: 0,
                col: 0,
                value: 0,
            },
        );
        let err = verify(&p, &buf, &in_map, None).unwrap_err();
        match err {
            KestrelGenError::Overwrite {
                layer, previous, ..
            } => {
                assert_eq!(layer, 0);
                assert_eq!(previous.layer, None);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn no_error_stop_downgrades_overwrite() {
        let dev = Device::KN1000;
        let shape = Shape::new(4, 1, 1);
        let mut p = params(&dev, 0xf, 8, shape);
        p.no_error_stop = true;
        let buf = ramp(shape);
        let mut in_map = OccupancyMap::new();
        in_map.insert(
            (dev.sram_base + 0x4000) >> 2,
            MemRecord {
                layer: None,
                channel: 0,
                row: 0,
                col: 0,
                value: 0,
            },
        );
        let ops = verify(&p, &buf, &in_map, None).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn max_count_truncates_stream() {
        let dev = Device::KN1000;
        let shape = Shape::new(4, 2, 2);
        let mut p = params(&dev, 0xf, 8, shape);
        p.max_count = Some(2);
        let buf = ramp(shape);
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        let checks = ops
            .iter()
            .filter(|o| matches!(o, VerifyOp::Check(_)))
            .count();
        assert_eq!(checks, 2);
        assert_eq!(*ops.last().unwrap(), VerifyOp::Truncated);
    }

    #[test]
    fn wide_output_checks_full_words() {
        let dev = Device::KN1000;
        let shape = Shape::new(2, 1, 1);
        let p = params(&dev, 0x3, 32, shape);
        let mut buf = Tensor::zeros(shape);
        buf.set(0, 0, 0, 0x1234_5678);
        buf.set(1, 0, 0, -1);
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        let checks: Vec<_> = ops
            .iter()
            .filter_map(|o| match o {
                VerifyOp::Check(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].value, 0x1234_5678);
        assert_eq!(checks[1].value, 0xffff_ffff);
        assert_eq!(checks[1].addr, checks[0].addr + 4);
    }

    #[test]
    fn channel_expansion_interleaves_passes() {
        let dev = Device::KN1000;
        let shape = Shape::new(8, 1, 2);
        let mut p = params(&dev, 0xf, 8, shape);
        p.layout.out_expand = 2;
        p.layout.out_expand_thresh = 4;
        let buf = ramp(shape);
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        let checks: Vec<_> = ops
            .iter()
            .filter_map(|o| match o {
                VerifyOp::Check(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(checks.len(), 4);
        // Channels 4..8 wrap back onto lanes 0..4 one word further into each
        // position's pitch: pass words interleave at stride 4 within the
        // 8-byte spatial pitch.
        let base = dev.sram_base + 0x4000;
        let addrs: Vec<u32> = checks.iter().map(|c| c.addr).collect();
        assert_eq!(addrs, vec![base, base + 4, base + 8, base + 12]);
        assert_eq!(
            checks.iter().map(|c| c.channel).collect::<Vec<_>>(),
            vec![0, 4, 0, 4]
        );
        // ramp: value(c, 0, col) = 2c + col.
        assert_eq!(checks[0].value, 0x0604_0200);
        assert_eq!(checks[1].value, 0x0e0c_0a08);
        assert_eq!(checks[2].value, 0x0705_0301);
        assert_eq!(checks[3].value, 0x0f0d_0b09);
        assert!(checks.iter().all(|c| c.num_bytes == 4));
    }

    #[test]
    fn mlator_packs_spatial_bytes() {
        let dev = Device::KN1000;
        let shape = Shape::new(1, 1, 4);
        let mut p = params(&dev, 0x1, 8, shape);
        p.mlator = true;
        p.apb_base = dev.apb_base;
        let mut buf = Tensor::zeros(shape);
        for col in 0..4 {
            buf.set(0, 0, col, col as i64 + 1);
        }
        let ops = verify(&p, &buf, &OccupancyMap::new(), None).unwrap();
        // Register setup, one packed check against the data register,
        // then disable.
        assert!(matches!(ops[0], VerifyOp::SetMlatorWritePointer { .. }));
        let VerifyOp::Check(check) = ops
            .iter()
            .find(|o| matches!(o, VerifyOp::Check(_)))
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(check.value, 0x0403_0201);
        assert_eq!(check.addr, regs::ctl_addr(&dev, 0, regs::REG_MLAT));
        assert!(matches!(
            ops.last().unwrap(),
            VerifyOp::DisableMlator { .. }
        ));
    }
}
