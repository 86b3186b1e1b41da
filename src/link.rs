//! Connectivity guard
//!
//! The link layer (WiFi association plus DHCP) has to be up before any bus
//! operation runs. When it is down the bus steps of a loop pass are skipped
//! and retried on the next pass.

use embassy_time::Instant;

pub trait LinkLayer {
    /// Whether IP connectivity is available right now
    fn is_link_up(&self) -> bool;

    /// Keep the link alive, e.g. re-associate after a drop. Must not block.
    fn maintain(&mut self, _now: Instant) {}
}

impl<L: LinkLayer + ?Sized> LinkLayer for &mut L {
    fn is_link_up(&self) -> bool {
        (**self).is_link_up()
    }

    fn maintain(&mut self, now: Instant) {
        (**self).maintain(now)
    }
}
