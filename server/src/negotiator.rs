//! Computes the protocol reply emitted during option negotiation (C3).

use miltergate_wire::optneg::{Capability, CompatibilityError, OptNeg, Protocol};

bitflags::bitflags! {
    /// The set of events a [`Milter`](crate::Milter) implementation actually
    /// wants to see.
    ///
    /// There is no `DefineMacro` or `Options` bit: those are internal to the
    /// session and never gated behind negotiation.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct Events: u32 {
        /// `Connect`
        const CONNECT = 0x0000_0001;
        /// `Hello`
        const HELO = 0x0000_0002;
        /// `Mail`
        const MAIL = 0x0000_0004;
        /// `Recipient`
        const RECIPIENT = 0x0000_0008;
        /// `Header`
        const HEADER = 0x0000_0010;
        /// `EndOfHeaders`
        const END_OF_HEADER = 0x0000_0020;
        /// `Data`
        const DATA = 0x0000_0040;
        /// `Body`
        const BODY = 0x0000_0080;
        /// `Unknown`
        const UNKNOWN = 0x0000_0100;
    }
}

/// What a [`Milter`](crate::Milter) implementation requires and tolerates
/// from the MTA.
///
/// The default is maximally permissive: every event is required (so the
/// MTA is asked to send everything, matching the wire protocol's
/// historical default of sending every event), nothing is optional, no
/// reply actions are required up front (an implementation might only ever
/// send `Continue`), and every modification action is left available.
#[derive(Debug, Clone, Copy)]
pub struct EventInterest {
    /// Events the milter cannot do its job without seeing.
    pub required_events: Events,
    /// Events the milter can tolerate the MTA skipping or not waiting on a
    /// reply for. Must be a subset of `required_events`.
    pub optional_events: Events,
    /// Reply/modification actions the milter cannot do its job without.
    pub required_actions: Capability,
    /// Reply/modification actions the milter would use if available.
    pub optional_actions: Capability,
    /// Whether this milter understands `Skip` replies to `Body` events.
    pub understands_skip: bool,
}

impl Default for EventInterest {
    fn default() -> Self {
        Self {
            required_events: Events::all(),
            optional_events: Events::empty(),
            required_actions: Capability::empty(),
            optional_actions: Capability::all(),
            understands_skip: false,
        }
    }
}

impl EventInterest {
    fn protocol_flags(&self) -> Protocol {
        let mut flags = Protocol::empty();

        const PAIRS: &[(Events, Protocol, Protocol)] = &[
            (Events::CONNECT, Protocol::NO_CONNECT, Protocol::NR_CONNECT),
            (Events::HELO, Protocol::NO_HELO, Protocol::NR_HELO),
            (Events::MAIL, Protocol::NO_MAIL, Protocol::NR_MAIL),
            (
                Events::RECIPIENT,
                Protocol::NO_RECIPIENT,
                Protocol::NR_RECIPIENT,
            ),
            (Events::HEADER, Protocol::NO_HEADER, Protocol::NR_HEADER),
            (
                Events::END_OF_HEADER,
                Protocol::NO_END_OF_HEADER,
                Protocol::NR_END_OF_HEADER,
            ),
            (Events::DATA, Protocol::NO_DATA, Protocol::NR_DATA),
            (Events::BODY, Protocol::NO_BODY, Protocol::NR_BODY),
            (Events::UNKNOWN, Protocol::NO_UNKNOWN, Protocol::NR_UNKNOWN),
        ];

        for (event, no_bit, nr_bit) in PAIRS {
            if !self.required_events.contains(*event) {
                flags |= *no_bit;
            } else if self.optional_events.contains(*event) {
                flags |= *nr_bit;
            }
        }

        if self.understands_skip {
            flags |= Protocol::SMFIP_SKIP;
        }

        flags
    }
}

/// The lowest protocol version this crate can still speak.
///
/// Postfix built before 2.6 offers `milter_protocol = 2`; below that there's
/// no way to negotiate a usable reply scheme.
const MIN_VERSION: u32 = 2;

/// Negotiate an [`OptNeg`] reply against what the MTA offered, per the
/// [`EventInterest`] a [`Milter`](crate::Milter) implementation declared.
///
/// The reply version is `min(theirs.version, our maximum)`, matching older
/// MTAs down to [`MIN_VERSION`] instead of insisting on this crate's own
/// maximum.
///
/// # Errors
/// Fails with [`CompatibilityError`] if the MTA's protocol version is below
/// what this crate supports, or if the MTA cannot offer a required action.
pub fn negotiate(theirs: &OptNeg, interest: &EventInterest) -> Result<OptNeg, CompatibilityError> {
    let ours = OptNeg::default();

    if theirs.version < MIN_VERSION {
        return Err(CompatibilityError::UnsupportedVersion {
            received: theirs.version,
            supported: MIN_VERSION,
        });
    }
    let version = theirs.version.min(ours.version);

    let requested = interest.required_actions | interest.optional_actions;
    if !theirs.capabilities.contains(interest.required_actions) {
        return Err(CompatibilityError::UnsupportedVersion {
            received: theirs.capabilities.bits(),
            supported: interest.required_actions.bits(),
        });
    }
    let effective_actions = requested.intersection(theirs.capabilities);

    Ok(OptNeg {
        version,
        capabilities: effective_actions,
        protocol: interest.protocol_flags(),
        macro_stages: ours.macro_stages,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mta_offers(capabilities: Capability) -> OptNeg {
        OptNeg {
            version: 6,
            capabilities,
            protocol: Protocol::empty(),
            macro_stages: Default::default(),
        }
    }

    #[test]
    fn test_effective_actions_within_bounds() {
        let interest = EventInterest {
            required_actions: Capability::SMFIF_ADDHDRS,
            optional_actions: Capability::SMFIF_CHGBODY,
            ..EventInterest::default()
        };
        let theirs = mta_offers(Capability::all());

        let negotiated = negotiate(&theirs, &interest).expect("negotiation succeeds");

        assert!(negotiated
            .capabilities
            .contains(Capability::SMFIF_ADDHDRS | Capability::SMFIF_CHGBODY));
        assert!(negotiated.capabilities.bits() & !theirs.capabilities.bits() == 0);
    }

    #[test]
    fn test_missing_required_capability_is_unsupported() {
        let interest = EventInterest {
            required_actions: Capability::SMFIF_QUARANTINE,
            ..EventInterest::default()
        };
        let theirs = mta_offers(Capability::SMFIF_ADDHDRS);

        assert!(negotiate(&theirs, &interest).is_err());
    }

    #[test]
    fn test_unrequired_event_gets_no_send_bit() {
        let interest = EventInterest {
            required_events: Events::CONNECT | Events::MAIL,
            ..EventInterest::default()
        };
        let theirs = mta_offers(Capability::all());

        let negotiated = negotiate(&theirs, &interest).expect("negotiation succeeds");

        assert!(negotiated.protocol.contains(Protocol::NO_HELO));
        assert!(!negotiated.protocol.contains(Protocol::NO_CONNECT));
        assert!(!negotiated.protocol.contains(Protocol::NO_MAIL));
    }

    #[test]
    fn test_version_downgrades_to_what_the_mta_offered() {
        let interest = EventInterest::default();
        let theirs = OptNeg {
            version: 2,
            ..mta_offers(Capability::all())
        };

        let negotiated = negotiate(&theirs, &interest).expect("negotiation succeeds");

        assert_eq!(negotiated.version, 2);
    }

    #[test]
    fn test_version_below_minimum_is_unsupported() {
        let interest = EventInterest::default();
        let theirs = OptNeg {
            version: 1,
            ..mta_offers(Capability::all())
        };

        assert!(negotiate(&theirs, &interest).is_err());
    }

    #[test]
    fn test_optional_event_gets_no_reply_bit() {
        let interest = EventInterest {
            required_events: Events::all(),
            optional_events: Events::BODY,
            ..EventInterest::default()
        };
        let theirs = mta_offers(Capability::all());

        let negotiated = negotiate(&theirs, &interest).expect("negotiation succeeds");

        assert!(negotiated.protocol.contains(Protocol::NR_BODY));
        assert!(!negotiated.protocol.contains(Protocol::NR_MAIL));
    }
}
