pub const TOPIC_CHAT_INBOUND: &str = "growbox/chat/inbound";
pub const TOPIC_CHAT_OUTBOUND: &str = "growbox/chat/outbound";

pub const TOPIC_CONTROLLER_STATE: &str = "growbox/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "growbox/controller/status";

/// Inbound chat payloads larger than this are dropped unparsed.
pub const MAX_INBOUND_PAYLOAD: usize = 512;
