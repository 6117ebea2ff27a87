//! Capability-gated emission of modification actions during the
//! end-of-message reply (C5).

use miltergate_wire::encoding::ServerMessage;
use miltergate_wire::modifications::{ModificationAction, ModificationResponse};
use miltergate_wire::optneg::Capability;

fn required_capability(modification: &ModificationAction) -> Capability {
    match modification {
        ModificationAction::AddHeader(_) => Capability::SMFIF_ADDHDRS,
        ModificationAction::ReplaceBody(_) => Capability::SMFIF_CHGBODY,
        ModificationAction::AddRecipient(_) => Capability::SMFIF_ADDRCPT,
        ModificationAction::DeleteRecipient(_) => Capability::SMFIF_DELRCPT,
        ModificationAction::ChangeHeader(_) | ModificationAction::InsertHeader(_) => {
            Capability::SMFIF_CHGHDRS
        }
        ModificationAction::Quarantine(_) => Capability::SMFIF_QUARANTINE,
    }
}

/// Turn a handler's [`ModificationResponse`] into the wire messages to send,
/// or name the first capability it needed that wasn't negotiated.
///
/// Unlike the bare capability filter this replaces, an ungated modification
/// is never silently dropped: the caller decides what to do about it (see
/// [`Milter::rejected_modification`](crate::Milter::rejected_modification)),
/// rather than this function closing the connection itself.
///
/// # Errors
/// Returns the first modification's required [`Capability`] if it wasn't
/// part of `effective_actions`.
pub fn gate(
    response: ModificationResponse,
    effective_actions: Capability,
) -> Result<Vec<ServerMessage>, Capability> {
    for modification in response.modifications() {
        let needed = required_capability(modification);
        if !effective_actions.contains(needed) {
            return Err(needed);
        }
    }

    Ok(response.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use miltergate_wire::modifications::headers::AddHeader;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gate_passes_negotiated_modification() {
        let mut builder = ModificationResponse::builder();
        builder.push(AddHeader::new(b"X-Test", b"1"));
        let response = builder.contin();

        let messages =
            gate(response, Capability::SMFIF_ADDHDRS).expect("negotiated modification is allowed through");

        assert_eq!(messages.len(), 2); // the AddHeader plus the final Continue
    }

    #[test]
    fn test_gate_rejects_ungated_modification() {
        let mut builder = ModificationResponse::builder();
        builder.push(AddHeader::new(b"X-Test", b"1"));
        let response = builder.contin();

        let needed =
            gate(response, Capability::empty()).expect_err("ungated modification must be rejected");

        assert_eq!(needed, Capability::SMFIF_ADDHDRS);
    }
}
