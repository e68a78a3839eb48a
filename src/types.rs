//! Core type definitions for the simulation framework.
//!
//! Devices and edges live in arenas owned by a [`GraphInstance`](crate::graph::GraphInstance)
//! and are addressed by the index newtypes defined here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ready-to-send word of a device.
///
/// Bit `i` is set when output port `i` has a message ready to go.
pub type RtsWord = u32;

/// Maximum number of output ports on a device type (the width of [`RtsWord`]).
pub const MAX_OUTPUTS: usize = RtsWord::BITS as usize;

/// Name of the input port fired once per device when a stepper attaches.
pub const INIT_PORT: &str = "__init__";

/// Position of a port within its device type, in declaration order.
pub type PortIndex = usize;

/// Arena index of a device inside a graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdx(pub usize);

/// Arena index of an edge inside a graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeIdx(pub usize);

impl fmt::Display for DeviceIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

impl fmt::Display for EdgeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

/// Returns the mask of valid rts bits for a device with `output_count` outputs.
pub fn rts_mask(output_count: usize) -> RtsWord {
    if output_count >= MAX_OUTPUTS {
        RtsWord::MAX
    } else {
        (1 << output_count) - 1
    }
}

/// Iterates the indices of the set bits of an rts word, lowest first.
pub fn rts_ports(rts: RtsWord) -> impl Iterator<Item = PortIndex> {
    let mut bits = rts;
    std::iter::from_fn(move || {
        if bits == 0 {
            return None;
        }
        let index = bits.trailing_zeros() as PortIndex;
        bits &= bits - 1;
        Some(index)
    })
}
