/// UDP port the LISP control plane listens and sends on.
///
/// ### See
///
/// RFC 6833 - Section 4.1: https://datatracker.ietf.org/doc/html/rfc6833#section-4.1
pub const LISP_CONTROL_PORT: u16 = 4342;

/// Interval in seconds between periodic Map-Register messages to each
/// configured Map-Server.
pub const MAP_REGISTER_INTERVAL: u64 = 60;

/// Default number of retransmissions for an outstanding request before its
/// timeout callback runs.
pub const DEFAULT_RETRIES: u8 = 3;

/// Default interval in seconds between retransmissions of the same request.
pub const DEFAULT_RETRY_INTERVAL: u64 = 3;

/// Upper bound accepted for configured retransmission counts.
pub const MAX_RETRANSMITS: u8 = 5;

/// Lower bound in seconds accepted for configured retransmission intervals.
pub const MIN_RETRANSMIT_INTERVAL: u64 = 1;

/// TTL in minutes carried by a Negative Map-Reply for an unknown EID.
pub const NEGATIVE_REPLY_TTL: u32 = 15;

/// TTL in minutes requested for registered mappings.
pub const DEFAULT_MAPPING_TTL: u32 = 10;

/// Seconds a solicited peer stays gated before another SMR may be sent
/// to it for the same EID.
pub const SMR_HOLDOFF: u64 = 1;

/// Priority value that marks a locator as configured but never used.
pub const UNUSED_RLOC_PRIORITY: u8 = 255;

/// Largest datagram the control plane will read or build.
pub const MAX_CONTROL_PKT_SIZE: usize = 4096;

/// Spokes in the timer wheel. With one-second ticks this covers a little
/// over an hour per rotation.
pub const WHEEL_SIZE: usize = 4096;

/// Timer wheel tick length in seconds.
pub const TICK_INTERVAL: u64 = 1;
