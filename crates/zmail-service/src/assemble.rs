//! Grouping decrypted parts back into messages.
//!
//! The part count is not carried on the wire. Every part of one message
//! carries the same sender timestamp, so parts are bucketed by exact
//! timestamp and a bucket becomes a message once it holds one `Text` part at
//! sequence 0 followed by `Continuation` parts covering `1..n`. Receipts always
//! stand alone. Buckets that cannot be read unambiguously (two leading parts,
//! duplicate or missing sequences) are reported as incomplete.

use std::collections::BTreeMap;

use tracing::debug;
use zmail_core::split::combine_sequenced;
use zmail_core::types::MessageType;

/// One decrypted memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedPart {
    pub txid: String,
    pub height: Option<u64>,
    pub output_index: u32,
    pub message_type: MessageType,
    pub sequence: u16,
    /// Sender-side unix seconds from the frame header, shared by every part
    /// of one message.
    pub timestamp: u32,
    pub content: String,
}

/// A logical message rebuilt from its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// `Text` or `Receipt`.
    pub message_type: MessageType,
    pub content: String,
    /// Txids of the parts in sequence order.
    pub txids: Vec<String>,
    /// Lowest mined height among the parts.
    pub height: Option<u64>,
    pub timestamp: u32,
}

impl AssembledMessage {
    /// Txid of part 0, used as the message id on the receiving side.
    pub fn id(&self) -> &str {
        self.txids.first().map(String::as_str).unwrap_or_default()
    }
}

/// Outcome of [`assemble`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub messages: Vec<AssembledMessage>,
    /// Groups that could not be combined (missing or duplicate parts, more
    /// than one leading part under a timestamp, or continuations without a
    /// leading text part). A later scan may complete them.
    pub incomplete: Vec<Vec<ScannedPart>>,
}

/// Group `parts` into messages, oldest sender timestamp first.
pub fn assemble(parts: Vec<ScannedPart>) -> Assembly {
    let mut buckets: BTreeMap<u32, Vec<ScannedPart>> = BTreeMap::new();
    for part in parts {
        buckets.entry(part.timestamp).or_default().push(part);
    }

    let mut assembly = Assembly::default();
    for (_, mut bucket) in buckets {
        bucket.sort_by(|a, b| (a.sequence, &a.txid).cmp(&(b.sequence, &b.txid)));
        let (receipts, group): (Vec<_>, Vec<_>) =
            bucket.into_iter().partition(|p| p.message_type == MessageType::Receipt);
        for receipt in receipts {
            assembly.push_group(vec![receipt]);
        }
        if !group.is_empty() {
            assembly.push_group(group);
        }
    }
    assembly
}

impl Assembly {
    fn push_group(&mut self, group: Vec<ScannedPart>) {
        match combine_group(group) {
            Ok(message) => self.messages.push(message),
            Err(group) => self.incomplete.push(group),
        }
    }
}

/// Combine one group sorted by sequence, handing it back untouched unless it
/// reads as exactly one message.
fn combine_group(group: Vec<ScannedPart>) -> Result<AssembledMessage, Vec<ScannedPart>> {
    let Some((message_type, timestamp)) = group.first().map(|p| (p.message_type, p.timestamp))
    else {
        return Err(group);
    };
    let well_formed = match message_type {
        MessageType::Text => group[1..]
            .iter()
            .all(|p| p.message_type == MessageType::Continuation),
        MessageType::Receipt => group.len() == 1,
        MessageType::Continuation => false,
    };
    if !well_formed {
        debug!(parts = group.len(), timestamp, "ambiguous message group");
        return Err(group);
    }

    let sequenced = group.iter().map(|p| (p.sequence, p.content.clone())).collect();
    let content = match combine_sequenced(sequenced) {
        Ok(content) => content,
        Err(e) => {
            debug!(parts = group.len(), error = %e, "incomplete message group");
            return Err(group);
        }
    };

    Ok(AssembledMessage {
        message_type,
        content,
        txids: group.iter().map(|p| p.txid.clone()).collect(),
        height: group.iter().filter_map(|p| p.height).min(),
        timestamp,
    })
}
