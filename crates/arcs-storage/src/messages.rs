//! Messages exchanged between particle proxies and stores.

use arcs_common::ReferenceId;
use serde::{Deserialize, Serialize};

/// Identifies a registered proxy callback on a store. Outbound
/// notifications skip the callback that originated the triggering message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackId(pub u64);

/// The tagged message union flowing between proxies and stores.
///
/// `mux_id` routes messages addressed to one entity of a backing store
/// family; it is unused for direct stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "Data: Serialize + for<'a> Deserialize<'a>, Op: Serialize + for<'a> Deserialize<'a>")]
pub enum ProxyMessage<Data, Op> {
    /// The sender wants a full model; the store responds to the sender
    /// only with a `ModelUpdate`.
    SyncRequest {
        id: Option<CallbackId>,
        mux_id: Option<ReferenceId>,
    },
    /// A full model to merge.
    ModelUpdate {
        model: Data,
        id: Option<CallbackId>,
        mux_id: Option<ReferenceId>,
    },
    /// A batch of operations to apply in order.
    Operations {
        operations: Vec<Op>,
        id: Option<CallbackId>,
        mux_id: Option<ReferenceId>,
    },
}

impl<Data, Op> ProxyMessage<Data, Op> {
    /// The callback that originated this message, if any.
    pub fn id(&self) -> Option<CallbackId> {
        match self {
            ProxyMessage::SyncRequest { id, .. } => *id,
            ProxyMessage::ModelUpdate { id, .. } => *id,
            ProxyMessage::Operations { id, .. } => *id,
        }
    }

    /// The entity this message is addressed to, for backing-store routing.
    pub fn mux_id(&self) -> Option<&ReferenceId> {
        match self {
            ProxyMessage::SyncRequest { mux_id, .. } => mux_id.as_ref(),
            ProxyMessage::ModelUpdate { mux_id, .. } => mux_id.as_ref(),
            ProxyMessage::Operations { mux_id, .. } => mux_id.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let msg: ProxyMessage<u32, u32> = ProxyMessage::SyncRequest {
            id: Some(CallbackId(3)),
            mux_id: Some(ReferenceId::from("an-id")),
        };
        assert_eq!(msg.id(), Some(CallbackId(3)));
        assert_eq!(msg.mux_id().map(|id| id.as_str()), Some("an-id"));
    }
}
