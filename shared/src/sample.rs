//! Message kinds spoken by the sample server and client binaries

crate::message_kind! {
    /// Kinds used by the ping/relay sample programs
    pub enum SampleMsg {
        /// Server greeting once a client passes the handshake
        ServerAccept = 0,
        /// Reply to a request the server does not serve
        ServerDeny = 1,
        /// Round-trip ping; body is the sender's timestamp in microseconds
        ServerPing = 2,
        /// Client asks the server to relay to everyone else
        MessageAll = 3,
        /// Relayed message; body ends with the sending client's ID
        ServerMessage = 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, MessageKind};

    #[test]
    fn test_sample_tags_are_stable() {
        assert_eq!(SampleMsg::ServerAccept.to_raw(), 0);
        assert_eq!(SampleMsg::ServerMessage.to_raw(), 4);
        assert_eq!(SampleMsg::from_raw(2), Some(SampleMsg::ServerPing));
    }

    #[test]
    fn test_relay_body_layout() {
        let mut msg = Message::new(SampleMsg::ServerMessage);
        msg.push(10001u32);
        assert_eq!(msg.to_string(), "ID:4 Size:4");
        assert_eq!(msg.pop::<u32>(), 10001);
    }
}
