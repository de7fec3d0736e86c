//! Negotiation state machine
//!
//! Tracks a peer connection from creation through offer/answer exchange to
//! a live or failed transport.
//!
//! ```text
//!            create_offer               remote answer
//!   New ───────────────► HaveLocalOffer ─────────────► HaveRemoteAnswer ──┐
//!    │                                                                    │
//!    │ remote offer               create_answer                           ├─► Connected ─► Failed
//!    └────────────► HaveRemoteOffer ─────────► HaveLocalAnswer ───────────┤
//!                                                                         └─► Failed
//!
//!   any state ── close ──► Closed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Negotiation state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    /// Created, nothing exchanged yet
    New,
    /// Local offer created, waiting for the remote answer
    HaveLocalOffer,
    /// Remote offer applied, local answer not created yet
    HaveRemoteOffer,
    /// Local answer created in response to a remote offer
    HaveLocalAnswer,
    /// Remote answer applied to our offer
    HaveRemoteAnswer,
    /// Transport reports media flowing
    Connected,
    /// Transport gave up
    Failed,
    /// Closed locally
    Closed,
}

/// Operations that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingOp {
    CreateOffer,
    CreateAnswer,
    ApplyRemoteOffer,
    ApplyRemoteAnswer,
    AddCandidate,
    TransportConnected,
    TransportFailed,
    Close,
}

impl SignalingOp {
    pub fn describe(&self) -> &'static str {
        match self {
            SignalingOp::CreateOffer => "create offer",
            SignalingOp::CreateAnswer => "create answer",
            SignalingOp::ApplyRemoteOffer => "apply remote offer",
            SignalingOp::ApplyRemoteAnswer => "apply remote answer",
            SignalingOp::AddCandidate => "add candidate",
            SignalingOp::TransportConnected => "mark connected",
            SignalingOp::TransportFailed => "mark failed",
            SignalingOp::Close => "close",
        }
    }
}

impl NegotiationState {
    /// State after applying `op`, or an invalid-state error
    pub fn apply(self, op: SignalingOp) -> Result<NegotiationState> {
        use NegotiationState::*;
        use SignalingOp::*;

        match (self, op) {
            (_, Close) => Ok(Closed),

            (New, CreateOffer) => Ok(HaveLocalOffer),
            (New, ApplyRemoteOffer) => Ok(HaveRemoteOffer),
            (HaveLocalOffer, ApplyRemoteAnswer) => Ok(HaveRemoteAnswer),
            (HaveRemoteOffer, CreateAnswer) => Ok(HaveLocalAnswer),

            (HaveRemoteAnswer | HaveLocalAnswer | Connected, TransportConnected) => Ok(Connected),
            (HaveRemoteAnswer | HaveLocalAnswer | Connected, TransportFailed) => Ok(Failed),

            (state, AddCandidate) if !state.is_terminal() => Ok(state),

            (
                New | HaveLocalOffer | HaveRemoteOffer | HaveLocalAnswer | HaveRemoteAnswer
                | Connected | Failed | Closed,
                CreateOffer | CreateAnswer | ApplyRemoteOffer | ApplyRemoteAnswer | AddCandidate
                | TransportConnected | TransportFailed,
            ) => Err(Error::invalid_state(op.describe(), self)),
        }
    }

    /// No further negotiation is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// Offer and answer have both been exchanged
    pub fn is_negotiated(&self) -> bool {
        matches!(
            self,
            NegotiationState::HaveRemoteAnswer
                | NegotiationState::HaveLocalAnswer
                | NegotiationState::Connected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::New => "new",
            NegotiationState::HaveLocalOffer => "have-local-offer",
            NegotiationState::HaveRemoteOffer => "have-remote-offer",
            NegotiationState::HaveLocalAnswer => "have-local-answer",
            NegotiationState::HaveRemoteAnswer => "have-remote-answer",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationState::*;
    use SignalingOp::*;

    #[test]
    fn test_offerer_lifecycle() {
        let state = New.apply(CreateOffer).unwrap();
        assert_eq!(state, HaveLocalOffer);

        let state = state.apply(ApplyRemoteAnswer).unwrap();
        assert_eq!(state, HaveRemoteAnswer);
        assert!(state.is_negotiated());

        let state = state.apply(TransportConnected).unwrap();
        assert_eq!(state, Connected);

        assert_eq!(state.apply(TransportFailed).unwrap(), Failed);
    }

    #[test]
    fn test_answerer_lifecycle() {
        let state = New.apply(ApplyRemoteOffer).unwrap();
        assert_eq!(state, HaveRemoteOffer);
        let state = state.apply(CreateAnswer).unwrap();
        assert_eq!(state, HaveLocalAnswer);
        assert_eq!(state.apply(TransportConnected).unwrap(), Connected);
    }

    #[test]
    fn test_second_offer_rejected() {
        let state = New.apply(CreateOffer).unwrap();
        let err = state.apply(CreateOffer).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "create offer",
                state: HaveLocalOffer
            }
        ));
    }

    #[test]
    fn test_invalid_remote_descriptions() {
        assert!(New.apply(ApplyRemoteAnswer).is_err());
        assert!(HaveLocalOffer.apply(ApplyRemoteOffer).is_err());
        assert!(HaveRemoteAnswer.apply(ApplyRemoteAnswer).is_err());
        assert!(HaveRemoteOffer.apply(ApplyRemoteOffer).is_err());
        assert!(New.apply(CreateAnswer).is_err());
    }

    #[test]
    fn test_transport_events_before_negotiation() {
        assert!(New.apply(TransportConnected).is_err());
        assert!(HaveLocalOffer.apply(TransportFailed).is_err());
    }

    #[test]
    fn test_close_from_anywhere() {
        for state in [
            New,
            HaveLocalOffer,
            HaveRemoteOffer,
            HaveLocalAnswer,
            HaveRemoteAnswer,
            Connected,
            Failed,
            Closed,
        ] {
            assert_eq!(state.apply(Close).unwrap(), Closed);
        }
    }

    #[test]
    fn test_candidates_only_while_live() {
        assert_eq!(New.apply(AddCandidate).unwrap(), New);
        assert_eq!(Connected.apply(AddCandidate).unwrap(), Connected);
        assert!(Failed.apply(AddCandidate).is_err());
        assert!(Closed.apply(AddCandidate).is_err());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(HaveRemoteAnswer.to_string(), "have-remote-answer");
        assert_eq!(
            serde_json::to_string(&HaveLocalOffer).unwrap(),
            "\"have-local-offer\""
        );
    }
}
