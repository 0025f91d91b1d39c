//! Signal strength of the link to the connected receiver.

use crate::peripherals::{PeerHandle, RadioLink};

/// The stack's latest RSSI for `peer`. Nothing is cached and whatever the
/// stack reports, including its "unknown" sentinel, goes out unchanged.
pub fn rssi<R: RadioLink>(radio: &R, peer: PeerHandle) -> i16 {
    radio.rssi(peer)
}
