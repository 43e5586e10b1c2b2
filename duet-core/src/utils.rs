pub const DEFAULT_STUN_ADDR: &str = "stun:stun1.l.google.com:19302";
pub const DEFAULT_STUN_ADDR_2: &str = "stun:stun2.l.google.com:19302";

/// Prefix of the pub/sub topic a room's negotiation traffic travels on.
pub const SIGNAL_TOPIC_PREFIX: &str = "webrtc:";
