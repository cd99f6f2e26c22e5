//! Bias memory packing.
//!
//! Each group owns one small bias memory. A layer with `conv_groups == 1`
//! places its bias values into a single group, chosen for least occupancy;
//! grouped convolutions replicate per-group slices into every group their
//! processors touch, with placeholder bytes wherever a processor in the span
//! is unused. The resulting per-layer offsets are later programmed into the
//! mask count registers, so offsets and byte order here must match the
//! hardware's bias fetch exactly.

use kestrel_chip::{ffs, fls, popcount, Device, ProcMap};
use tracing::warn;

use crate::error::{KestrelGenError, Result};

/// Bias-relevant configuration of one layer.
#[derive(Debug, Clone)]
pub struct BiasLayer<'a> {
    /// Quantized bias values, one per output channel. `None` if the layer
    /// has no bias.
    pub bias: Option<&'a [i64]>,
    /// Groups this layer is allowed to allocate from. `None` disables bias
    /// for the layer.
    pub group_map: Option<&'a [usize]>,
    /// Output channel count.
    pub output_channels: usize,
    /// True if the layer uses streaming input.
    pub streaming: bool,
    /// Convolution group count (1 = ungrouped).
    pub conv_groups: usize,
    /// True if the layer's weights are fetched in broadcast mode.
    pub broadcast_mode: bool,
    /// Input processors of the layer.
    pub processor_map: ProcMap,
    /// Output processors of the layer.
    pub output_processor_map: ProcMap,
    /// Output expansion pass count.
    pub out_expand: usize,
}

/// Which bias memories a layer ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasGroup {
    /// All values live in one group.
    Single(usize),
    /// Grouped convolution, values replicated across the used groups.
    All,
}

/// Result of packing: per-layer offsets plus the final memory images.
#[derive(Debug, Clone)]
pub struct BiasAllocation {
    /// Byte offset of each layer's bias within each group's memory, indexed
    /// `[layer][group]`. `None` where the layer does not use the group.
    pub offsets: Vec<Vec<Option<usize>>>,
    /// Placement decision per layer. `None` for layers without bias.
    pub group: Vec<Option<BiasGroup>>,
    /// Bytes used per group.
    pub group_bytes: Vec<usize>,
    /// Memory images, indexed `[group][byte]`. `None` bytes are placeholders
    /// that are never fetched.
    pub memory: Vec<Vec<Option<u8>>>,
}

impl BiasAllocation {
    /// Used portion of one group's memory as loadable bytes. Placeholder
    /// bytes read as zero.
    #[must_use]
    pub fn image(&self, group: usize) -> Vec<u8> {
        self.memory[group][..self.group_bytes[group]]
            .iter()
            .map(|b| b.unwrap_or(0))
            .collect()
    }
}

/// Pack the bias values of `layers[start_layer..]` into the per-group bias
/// memories.
pub fn pack(dev: &Device, layers: &[BiasLayer<'_>], start_layer: usize) -> Result<BiasAllocation> {
    let mut group_bytes = vec![0usize; dev.groups];
    let mut memory = vec![vec![None; dev.bias_size]; dev.groups];
    let mut offsets = vec![vec![None; dev.groups]; layers.len()];
    let mut group = vec![None; layers.len()];

    for (ll, layer) in layers.iter().enumerate().skip(start_layer) {
        let (Some(bias), Some(group_map)) = (layer.bias, layer.group_map) else {
            continue;
        };
        if bias.len() != layer.output_channels {
            return Err(KestrelGenError::BiasLengthMismatch {
                layer: ll,
                expected: layer.output_channels,
                actual: bias.len(),
            });
        }
        if bias.iter().all(|&b| b == 0) {
            warn!(layer = ll, "all bias values are zero, ignoring the input");
            continue;
        }

        // The first channel's byte lane within its quad shifts the whole
        // allocation, once per expansion pass.
        let mut target_offs = layer.output_processor_map.first() % dev.shared_procs
            * layer.out_expand;
        let mut bias_len = layer.output_channels + target_offs;

        // First-generation parts cannot feed the bias memory while layer 0
        // streams; a placeholder byte works around the issue.
        let errata = ll == 0 && layer.streaming && !dev.streaming_bias;
        if errata {
            bias_len += 1;
        }
        if layer.streaming && !dev.streaming_bias {
            warn!(
                layer = ll,
                "layer uses streaming and a bias, this combination might not function correctly"
            );
        }

        if layer.conv_groups == 1 {
            // Pick the allowed group with the least amount of data in it.
            let target = group_map
                .iter()
                .copied()
                .min_by_key(|&g| group_bytes[g])
                .ok_or(KestrelGenError::BiasCapacity {
                    layer: ll,
                    groups: group_map.to_vec(),
                    used: group_bytes.clone(),
                    needed: bias_len,
                })?;
            if group_bytes[target] + bias_len > dev.bias_size {
                return Err(KestrelGenError::BiasCapacity {
                    layer: ll,
                    groups: group_map.to_vec(),
                    used: group_bytes.clone(),
                    needed: bias_len,
                });
            }
            group[ll] = Some(BiasGroup::Single(target));
            for g in 0..dev.groups {
                offsets[ll][g] = Some(group_bytes[target]);
            }

            let base = group_bytes[target];
            if errata {
                memory[target][base] = Some(0);
                target_offs += 1;
            }
            for &value in bias {
                memory[target][base + target_offs] = Some((value & 0xff) as u8);
                target_offs += 1;
            }
            group_bytes[target] += bias_len;
        } else {
            pack_grouped(
                dev,
                ll,
                layer,
                bias,
                &mut group_bytes,
                &mut memory,
                &mut offsets[ll],
            )?;
            group[ll] = Some(BiasGroup::All);
        }
    }

    Ok(BiasAllocation {
        offsets,
        group,
        group_bytes,
        memory,
    })
}

/// Grouped convolutions replicate bias slices into every group their input
/// processors touch.
fn pack_grouped(
    dev: &Device,
    ll: usize,
    layer: &BiasLayer<'_>,
    bias: &[i64],
    group_bytes: &mut [usize],
    memory: &mut [Vec<Option<u8>>],
    offsets: &mut [Option<usize>],
) -> Result<()> {
    let mut used_groups = 0;
    for g in 0..dev.groups {
        if layer.processor_map.group_bits(g, dev.procs_per_group) != 0 {
            if layer.broadcast_mode {
                // Word-align so all groups can be read in parallel.
                group_bytes[g] = (group_bytes[g] + 3) & !3;
            }
            offsets[g] = Some(group_bytes[g]);
            used_groups += 1;
        } else {
            offsets[g] = None;
        }
    }

    let mut map_used = layer.processor_map.0;
    if !layer.broadcast_mode {
        // The first group's leading gap is rotated to the end of that group.
        let start_proc = layer.processor_map.first();
        let first_group = start_proc / dev.procs_per_group;
        let first_group_bits = dev.group_mask() << (first_group * dev.procs_per_group);
        map_used &= !first_group_bits;
        map_used |= (layer.processor_map.0 & first_group_bits)
            >> (start_proc % dev.procs_per_group);
    }

    let mut start_proc = ffs(map_used).unwrap_or(0);
    if layer.broadcast_mode || used_groups > 1 {
        // Pad out to allow for parallel reads from the 8-bit memories.
        start_proc &= !(dev.group_mask() as usize);
    }
    let last_proc = fls(map_used).unwrap_or(0);

    // Break the bias into expansion passes, padding an odd tail with
    // placeholder values.
    let leftover = (layer.out_expand - bias.len() % layer.out_expand) % layer.out_expand;
    let mut padded: Vec<Option<i64>> = bias.iter().copied().map(Some).collect();
    padded.extend(std::iter::repeat(None).take(leftover));
    let cols = padded.len() / layer.out_expand;
    debug_assert_eq!(cols, popcount(layer.processor_map.0));
    let mut rows: Vec<Vec<Option<i64>>> = padded.chunks(cols).map(<[_]>::to_vec).collect();

    // Insert placeholder columns where processors in the span are unused.
    // Inserting left to right keeps the processor index aligned with the
    // column index. The last processor is known used; the first may not be.
    for proc in start_proc..last_proc {
        if map_used >> proc & 1 == 0 {
            for row in &mut rows {
                row.insert(proc - start_proc, None);
            }
        }
    }
    let padded_cols = rows[0].len();

    for (expand, row) in rows.iter().enumerate() {
        for p in start_proc..=last_proc {
            let g = p / dev.procs_per_group;
            // Broadcast fetch transposes the quad ordering within a group.
            let src = if layer.broadcast_mode {
                (p & !0xf) + (p % 4) * 4 + (p % 16) / 4
            } else {
                p
            };
            let value = if src - start_proc < padded_cols {
                row[src - start_proc]
            } else {
                None
            };
            // Placeholders still consume space, except at the very tail.
            if expand < layer.out_expand - 1
                || p as isize <= last_proc as isize - leftover as isize
            {
                add_byte(dev, ll, g, value, group_bytes, memory)?;
            }
        }
    }
    Ok(())
}

fn add_byte(
    dev: &Device,
    layer: usize,
    group: usize,
    value: Option<i64>,
    group_bytes: &mut [usize],
    memory: &mut [Vec<Option<u8>>],
) -> Result<()> {
    if group_bytes[group] >= dev.bias_size {
        return Err(KestrelGenError::BiasGroupCapacity {
            layer,
            group,
            used: group_bytes[group],
        });
    }
    if let Some(v) = value {
        memory[group][group_bytes[group]] = Some((v & 0xff) as u8);
    }
    group_bytes[group] += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer<'a>(bias: &'a [i64], group_map: &'a [usize], out_proc: u64) -> BiasLayer<'a> {
        BiasLayer {
            bias: Some(bias),
            group_map: Some(group_map),
            output_channels: bias.len(),
            streaming: false,
            conv_groups: 1,
            broadcast_mode: false,
            processor_map: ProcMap(out_proc),
            output_processor_map: ProcMap(out_proc),
            out_expand: 1,
        }
    }

    #[test]
    fn single_group_packs_consecutively() {
        let dev = Device::KN1000;
        let b0 = [1i64, 2, 3, 4];
        let b1 = [5i64, 6];
        let layers = [layer(&b0, &[0], 0xf), layer(&b1, &[0], 0x3)];
        let alloc = pack(&dev, &layers, 0).unwrap();
        assert_eq!(alloc.group[0], Some(BiasGroup::Single(0)));
        assert_eq!(alloc.offsets[0][0], Some(0));
        assert_eq!(alloc.offsets[1][0], Some(4));
        assert_eq!(alloc.group_bytes[0], 6);
        assert_eq!(alloc.image(0), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn least_occupied_group_wins() {
        let dev = Device::KN1000;
        let b0 = [1i64; 10];
        let b1 = [2i64; 4];
        let layers = [layer(&b0, &[0, 1], 0xf), layer(&b1, &[0, 1], 0xf)];
        let alloc = pack(&dev, &layers, 0).unwrap();
        assert_eq!(alloc.group[0], Some(BiasGroup::Single(0)));
        assert_eq!(alloc.group[1], Some(BiasGroup::Single(1)));
        assert_eq!(alloc.offsets[1][1], Some(0));
    }

    #[test]
    fn lane_offset_shifts_values() {
        let dev = Device::KN1000;
        let b = [7i64, 8];
        // First output processor is lane 2 of its quad.
        let l = layer(&b, &[0], 0b100);
        let alloc = pack(&dev, &[l], 0).unwrap();
        assert_eq!(alloc.group_bytes[0], 4);
        assert_eq!(alloc.memory[0][0], None);
        assert_eq!(alloc.memory[0][1], None);
        assert_eq!(alloc.memory[0][2], Some(7));
        assert_eq!(alloc.memory[0][3], Some(8));
        assert_eq!(alloc.image(0), vec![0, 0, 7, 8]);
    }

    #[test]
    fn streaming_errata_inserts_placeholder() {
        let dev = Device::KN1000;
        let b = [9i64, 10];
        let mut l = layer(&b, &[0], 0x3);
        l.streaming = true;
        let alloc = pack(&dev, &[l], 0).unwrap();
        // One placeholder byte before the data, total length grows by one.
        assert_eq!(alloc.group_bytes[0], 3);
        assert_eq!(alloc.memory[0][0], Some(0));
        assert_eq!(alloc.memory[0][1], Some(9));
        assert_eq!(alloc.memory[0][2], Some(10));
    }

    #[test]
    fn no_errata_with_streaming_bias_support() {
        let dev = Device::KN2000;
        let b = [9i64, 10];
        let mut l = layer(&b, &[0], 0x3);
        l.streaming = true;
        let alloc = pack(&dev, &[l], 0).unwrap();
        assert_eq!(alloc.group_bytes[0], 2);
        assert_eq!(alloc.memory[0][0], Some(9));
    }

    #[test]
    fn capacity_exceeded_is_fatal() {
        let dev = Device::KN1000;
        let big = vec![1i64; dev.bias_size + 1];
        let l = layer(&big, &[0], 0xffff);
        let err = pack(&dev, &[l], 0).unwrap_err();
        assert!(matches!(
            err,
            KestrelGenError::BiasCapacity { layer: 0, .. }
        ));
    }

    #[test]
    fn zero_bias_is_skipped() {
        let dev = Device::KN1000;
        let b = [0i64; 4];
        let alloc = pack(&dev, &[layer(&b, &[0], 0xf)], 0).unwrap();
        assert_eq!(alloc.group[0], None);
        assert_eq!(alloc.group_bytes[0], 0);
    }

    #[test]
    fn grouped_conv_replicates_across_groups() {
        let dev = Device::KN1000;
        // Two groups, two processors each, one bias value per processor.
        let b = [1i64, 2, 3, 4];
        let mut l = layer(&b, &[0, 1], 0x0003_0003);
        l.conv_groups = 2;
        let alloc = pack(&dev, &[l], 0).unwrap();
        assert_eq!(alloc.group[0], Some(BiasGroup::All));
        assert_eq!(alloc.offsets[0][0], Some(0));
        assert_eq!(alloc.offsets[0][1], Some(0));
        assert_eq!(alloc.offsets[0][2], None);
        // Span covers lanes 0..=17 of the rotated map; groups fill in order.
        assert_eq!(alloc.memory[0][0], Some(1));
        assert_eq!(alloc.memory[0][1], Some(2));
        assert_eq!(alloc.memory[1][0], Some(3));
        assert_eq!(alloc.memory[1][1], Some(4));
    }

    #[test]
    fn broadcast_interleave_reorders_lane_values() {
        let dev = Device::KN1000;
        // One value per quad leader (lanes 0, 4, 8, 12). The broadcast fetch
        // transform maps memory bytes 0..=3 to those lanes, so the four
        // values land first and every remaining span byte is a placeholder.
        let b = [5i64, 6, 7, 8];
        let mut l = layer(&b, &[0], 0x1111);
        l.conv_groups = 4;
        l.broadcast_mode = true;
        let alloc = pack(&dev, &[l], 0).unwrap();
        assert_eq!(alloc.offsets[0][0], Some(0));
        // Span covers lanes 0..=12: 13 bytes, values up front.
        assert_eq!(alloc.group_bytes[0], 13);
        assert_eq!(alloc.memory[0][0], Some(5));
        assert_eq!(alloc.memory[0][1], Some(6));
        assert_eq!(alloc.memory[0][2], Some(7));
        assert_eq!(alloc.memory[0][3], Some(8));
        assert!(alloc.memory[0][4..13].iter().all(Option::is_none));
        assert_eq!(alloc.image(0), vec![5, 6, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn broadcast_mode_aligns_group_cursor() {
        let dev = Device::KN1000;
        let b0 = [1i64, 2];
        let b1 = [5i64, 6, 7, 8];
        let l0 = layer(&b0, &[0], 0x3);
        let mut l1 = layer(&b1, &[0], 0x1111);
        l1.conv_groups = 4;
        l1.broadcast_mode = true;
        let layers = [l0, l1];
        let alloc = pack(&dev, &layers, 0).unwrap();
        // Layer 0 used 2 bytes; broadcast alignment rounds the cursor to 4.
        assert_eq!(alloc.offsets[1][0], Some(4));
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let dev = Device::KN1000;
        let b = [1i64, 2, 3];
        let mut l = layer(&b, &[0], 0xf);
        l.output_channels = 4;
        let err = pack(&dev, &[l], 0).unwrap_err();
        assert!(matches!(
            err,
            KestrelGenError::BiasLengthMismatch {
                layer: 0,
                expected: 4,
                actual: 3,
            }
        ));
    }
}
