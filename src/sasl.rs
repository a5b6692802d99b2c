//! SASL mechanism negotiation, wrapping `rsasl` behind the narrow interface
//! the bind processor needs (spec §4.8's SASL bind steps). Grounded in the
//! teacher's `[dev-dependencies] rsasl` usage (`sync.rs`'s
//! `sasl_external_bind`) generalized to a server-side authenticator.
//!
//! `rsasl`'s session object already implements exactly the step/continue
//! state machine spec §4.8 describes; this module only narrows its surface
//! and adapts its SSF/authzid output into this crate's `io_layer` types.

use rsasl::mechname::Mechname;
use rsasl::prelude::{SASLServer, Session, SessionError};

use crate::error::{FrontendError, Result};

/// Outcome of feeding one round of SASL credentials through a session.
pub enum SaslStep {
    /// More data must flow before the bind can conclude; send
    /// `saslBindInProgress` with this server challenge.
    Continue(Vec<u8>),
    /// The exchange is complete; `authzid` is the authenticated identity,
    /// `final_data` is optional data to return with the success response.
    Done { authzid: String, final_data: Option<Vec<u8>> },
}

/// A single SASL bind's in-progress negotiation state, held on the
/// connection between `BindRequest`s that carry the same mechanism
/// (spec's SASL_CONTINUE connection flag).
pub struct SaslExchange {
    session: Session<()>,
}

impl SaslExchange {
    pub fn new(sasl: &SASLServer<()>, mechanism: &str) -> Result<SaslExchange> {
        let mechname = Mechname::parse(mechanism.as_bytes())
            .map_err(|_| FrontendError::Sasl(format!("unsupported mechanism: {mechanism}")))?;
        let session = sasl
            .start_suggested(mechname)
            .map_err(|e| FrontendError::Sasl(e.to_string()))?;
        Ok(SaslExchange { session })
    }

    pub fn step(&mut self, input: Option<&[u8]>) -> Result<SaslStep> {
        let mut out = Vec::new();
        let state = self
            .session
            .step(input, &mut out)
            .map_err(|e: SessionError| FrontendError::Sasl(e.to_string()))?;
        if state.is_finished() {
            let authzid = self
                .session
                .get_property::<rsasl::property::AuthzId>()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            Ok(SaslStep::Done { authzid, final_data: if out.is_empty() { None } else { Some(out) } })
        } else {
            Ok(SaslStep::Continue(out))
        }
    }
}
