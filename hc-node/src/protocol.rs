//! Protocol multiplexing: which of the four sub-protocols a message belongs
//! to, and that protocol's wire identifier and admissible message types.

use crate::message::MsgType;

/// One of the four sub-protocols multiplexed over a node's connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    Action,
    Validate,
    Gossip,
    Kademlia,
}

impl ProtocolTag {
    /// All four tags, in the order their streams are registered.
    pub const ALL: [ProtocolTag; 4] = [
        ProtocolTag::Action,
        ProtocolTag::Validate,
        ProtocolTag::Gossip,
        ProtocolTag::Kademlia,
    ];

    fn name(&self) -> &'static str {
        match self {
            ProtocolTag::Action => "action",
            ProtocolTag::Validate => "validate",
            ProtocolTag::Gossip => "gossip",
            ProtocolTag::Kademlia => "kademlia",
        }
    }

    /// The libp2p wire protocol identifier for this sub-protocol, scoped to
    /// a particular DNA/mux id so that two DHTs sharing a process never
    /// cross-talk.
    pub fn wire_id(&self, mux_id: &str) -> String {
        format!("/hc-{}-{}/0.0.0", self.name(), mux_id)
    }

    /// The message types a stream handler on this protocol is willing to
    /// dispatch. A message arriving on the wrong protocol is a protocol
    /// violation, not silently accepted.
    pub fn admits(&self, msg_type: MsgType) -> bool {
        use MsgType::*;
        match self {
            ProtocolTag::Action => matches!(
                msg_type,
                Put | Delete
                    | Modify
                    | Get
                    | Link
                    | GetLink
                    | DeleteLink
                    | ListAdd
                    | AppMessage
                    | OkResponse
                    | ErrorResponse
            ),
            ProtocolTag::Validate => matches!(
                msg_type,
                ValidatePut
                    | ValidateLink
                    | ValidateDel
                    | ValidateMod
                    | OkResponse
                    | ErrorResponse
            ),
            ProtocolTag::Gossip => matches!(msg_type, Gossip | OkResponse | ErrorResponse),
            ProtocolTag::Kademlia => matches!(msg_type, FindNode | OkResponse | ErrorResponse),
        }
    }

    /// Checks `msg_type` against this protocol's admissible set, producing
    /// the same protocol-violation error the wire handler would return.
    pub fn check(&self, msg_type: MsgType) -> crate::error::Result<()> {
        if self.admits(msg_type) {
            Ok(())
        } else {
            Err(crate::error::protocol_mismatch(msg_type, self.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgType;

    #[test]
    fn wire_id_is_scoped_to_mux() {
        assert_eq!(ProtocolTag::Gossip.wire_id("mydna"), "/hc-gossip-mydna/0.0.0");
        assert_eq!(ProtocolTag::Kademlia.wire_id("mydna"), "/hc-kademlia-mydna/0.0.0");
    }

    #[test]
    fn each_protocol_admits_its_own_types_only() {
        assert!(ProtocolTag::Action.admits(MsgType::Put));
        assert!(!ProtocolTag::Action.admits(MsgType::Gossip));

        assert!(ProtocolTag::Gossip.admits(MsgType::Gossip));
        assert!(!ProtocolTag::Gossip.admits(MsgType::Put));

        assert!(ProtocolTag::Validate.admits(MsgType::ValidatePut));
        assert!(!ProtocolTag::Validate.admits(MsgType::FindNode));

        assert!(ProtocolTag::Kademlia.admits(MsgType::FindNode));
        assert!(!ProtocolTag::Kademlia.admits(MsgType::ValidatePut));
    }

    #[test]
    fn mismatched_type_is_an_error() {
        let err = ProtocolTag::Action.check(MsgType::Gossip).unwrap_err();
        assert_eq!(err.to_string(), "message type gossip is not valid on the action protocol");
    }

    #[test]
    fn responses_are_admitted_on_every_protocol() {
        for tag in ProtocolTag::ALL {
            assert!(tag.admits(MsgType::OkResponse));
            assert!(tag.admits(MsgType::ErrorResponse));
        }
    }
}
